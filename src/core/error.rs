//! 运行时错误类型
//!
//! 只有 Configuration（构造期配置错误）会中止一次运行；
//! ToolInvocation / TaskExecution / Backend 在各自边界被捕获并转为结构化失败数据。

use thiserror::Error;

/// 会话引擎与工具层可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 运行时或 Agent 构造不合法（致命，构造期抛出）
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 工具调用失败（在分发边界内转为失败的 ToolResult，不向上传播）
    #[error("Tool invocation failed: {0}")]
    ToolInvocation(String),

    /// 单个任务执行失败（由调度器转为 Failed 状态 + task-failed 事件）
    #[error("Task execution failed: {0}")]
    TaskExecution(String),

    /// LLM 后端调用失败（记录日志后提前结束流）
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Json(e.to_string())
    }
}
