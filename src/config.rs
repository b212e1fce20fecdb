//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DART__*` 覆盖（双下划线表示嵌套，如 `DART__RUNTIME__DEFAULT_MODEL=qwen3:32b`）。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub chat: ChatConfig,
    pub conversation: ConversationSection,
    pub scheduler: SchedulerSection,
}

/// [runtime] 段：后端地址、凭据、可用模型
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// 未设置时回退到 OPENAI_API_KEY 环境变量
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 允许使用的模型；为空表示不限制
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 单次后端请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_model() -> String {
    "qwen3:8b".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            models: Vec::new(),
            default_model: default_model(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RuntimeConfig {
    /// 默认模型必须非空，且在非空的 models 列表中
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.default_model.trim().is_empty() {
            return Err(AgentError::Configuration("default_model is empty".to_string()));
        }
        if !self.is_model_allowed(&self.default_model) {
            return Err(AgentError::Configuration(format!(
                "default_model \"{}\" is not in the available models: {:?}",
                self.default_model, self.models
            )));
        }
        Ok(())
    }

    pub fn is_model_allowed(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }
}

/// [chat] 段：采样参数；未设置的字段不会出现在请求中
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// auto / none / required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

impl ChatConfig {
    /// 叠加：other 中已设置的字段覆盖 self
    pub fn merge(&self, other: &ChatConfig) -> ChatConfig {
        ChatConfig {
            model: other.model.clone().or_else(|| self.model.clone()),
            temperature: other.temperature.or(self.temperature),
            top_p: other.top_p.or(self.top_p),
            max_tokens: other.max_tokens.or(self.max_tokens),
            presence_penalty: other.presence_penalty.or(self.presence_penalty),
            frequency_penalty: other.frequency_penalty.or(self.frequency_penalty),
            stop: other.stop.clone().or_else(|| self.stop.clone()),
            tool_choice: other.tool_choice.clone().or_else(|| self.tool_choice.clone()),
        }
    }
}

/// [conversation] 段：会话引擎默认行为
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationSection {
    /// 单次运行的轮数上限
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_true")]
    pub stream: bool,
    /// 本轮没有工具调用时结束
    #[serde(default = "default_true")]
    pub stop_if_no_tools: bool,
    /// 把思考段并入输出内容
    #[serde(default)]
    pub include_think: bool,
    /// 委派时把已有的工具消息带给被委派的 Agent
    #[serde(default = "default_true")]
    pub share_tool_results: bool,
    /// 并行执行工具的并发上限
    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,
}

fn default_max_turns() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_max_parallel_tools() -> usize {
    16
}

impl Default for ConversationSection {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            stream: true,
            stop_if_no_tools: true,
            include_think: false,
            share_tool_results: true,
            max_parallel_tools: default_max_parallel_tools(),
        }
    }
}

/// [scheduler] 段：DAG 调度参数
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// 同时执行的任务数上限
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    /// 无新事件时等待任务结束的最长时间（毫秒）
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    /// 是否强制执行任务的 timeout
    #[serde(default = "default_true")]
    pub enforce_timeouts: bool,
}

fn default_max_parallelism() -> usize {
    4
}

fn default_wait_timeout_ms() -> u64 {
    1000
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_parallelism: default_max_parallelism(),
            wait_timeout_ms: default_wait_timeout_ms(),
            enforce_timeouts: true,
        }
    }
}

/// 从 config 目录加载配置，环境变量 DART__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DART__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DART")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
