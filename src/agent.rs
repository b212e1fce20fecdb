//! Agent：具名的能力描述
//!
//! Agent 是可廉价克隆的句柄（内部 Arc），同一个 Agent 可以同时出现在多个任务、
//! 多个委派列表里。工具列表与委派列表可在两次运行之间由持有者修改；
//! 每轮分发前通过 capabilities() 重新生成名称 -> 能力的查找表。
//! 委派列表允许互相引用（A 委派给 B，B 再委派回 A），由此形成的 Arc 环不会被回收，
//! Agent 通常与进程同寿命。

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Serialize, Serializer};

use crate::config::ChatConfig;
use crate::core::AgentError;
use crate::runtime::Runtime;
use crate::tools::registry::{Tool, ToolRegistry};
use crate::tools::schema::ToolDescriptor;

/// 名称最大长度（与 OpenAI 函数名限制一致）
const MAX_NAME_LEN: usize = 64;

struct AgentInner {
    name: String,
    persona: String,
    description: String,
    tools: RwLock<Vec<Arc<dyn Tool>>>,
    handoffs: RwLock<Vec<Agent>>,
    execute_tools: bool,
    parallel_execute: bool,
    ignore_tools: bool,
    ignore_handoffs: bool,
    chat_config: Option<ChatConfig>,
    /// 作为委派目标时使用的独立运行时；为空则沿用调用方的运行时
    runtime: Option<Arc<Runtime>>,
}

/// Agent 句柄
#[derive(Clone)]
pub struct Agent(Arc<AgentInner>);

/// Agent 构造器
pub struct AgentBuilder {
    name: String,
    persona: String,
    description: String,
    tools: Vec<Arc<dyn Tool>>,
    handoffs: Vec<Agent>,
    execute_tools: bool,
    parallel_execute: bool,
    ignore_tools: bool,
    ignore_handoffs: bool,
    chat_config: Option<ChatConfig>,
    runtime: Option<Arc<Runtime>>,
}

impl AgentBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persona: String::new(),
            description: String::new(),
            tools: Vec::new(),
            handoffs: Vec::new(),
            execute_tools: true,
            parallel_execute: false,
            ignore_tools: false,
            ignore_handoffs: false,
            chat_config: None,
            runtime: None,
        }
    }

    /// 角色设定
    pub fn persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// 任务说明（限定职责范围）
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn handoff(mut self, agent: Agent) -> Self {
        self.handoffs.push(agent);
        self
    }

    pub fn execute_tools(mut self, on: bool) -> Self {
        self.execute_tools = on;
        self
    }

    pub fn parallel_execute(mut self, on: bool) -> Self {
        self.parallel_execute = on;
        self
    }

    pub fn ignore_tools(mut self, on: bool) -> Self {
        self.ignore_tools = on;
        self
    }

    pub fn ignore_handoffs(mut self, on: bool) -> Self {
        self.ignore_handoffs = on;
        self
    }

    pub fn chat_config(mut self, config: ChatConfig) -> Self {
        self.chat_config = Some(config);
        self
    }

    pub fn runtime(mut self, runtime: Arc<Runtime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        validate_name(&self.name)?;
        Ok(Agent(Arc::new(AgentInner {
            name: self.name,
            persona: self.persona,
            description: self.description,
            tools: RwLock::new(self.tools),
            handoffs: RwLock::new(self.handoffs),
            execute_tools: self.execute_tools,
            parallel_execute: self.parallel_execute,
            ignore_tools: self.ignore_tools,
            ignore_handoffs: self.ignore_handoffs,
            chat_config: self.chat_config,
            runtime: self.runtime,
        })))
    }
}

/// 名称会作为函数名暴露给后端：1-64 个字母、数字、下划线或连字符
fn validate_name(name: &str) -> Result<(), AgentError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AgentError::Configuration(format!(
            "invalid agent name '{}': expected 1-{} characters of [A-Za-z0-9_-]",
            name, MAX_NAME_LEN
        )))
    }
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn persona(&self) -> &str {
        &self.0.persona
    }

    pub fn description(&self) -> &str {
        &self.0.description
    }

    pub fn execute_tools(&self) -> bool {
        self.0.execute_tools
    }

    pub fn parallel_execute(&self) -> bool {
        self.0.parallel_execute
    }

    pub fn ignore_tools(&self) -> bool {
        self.0.ignore_tools
    }

    pub fn ignore_handoffs(&self) -> bool {
        self.0.ignore_handoffs
    }

    pub fn chat_config(&self) -> Option<&ChatConfig> {
        self.0.chat_config.as_ref()
    }

    pub fn runtime(&self) -> Option<&Arc<Runtime>> {
        self.0.runtime.as_ref()
    }

    /// 当前工具列表的快照
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.0.tools.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 当前委派列表的快照
    pub fn handoffs(&self) -> Vec<Agent> {
        self.0.handoffs.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn add_tool(&self, tool: Arc<dyn Tool>) {
        self.0.tools.write().unwrap_or_else(PoisonError::into_inner).push(tool);
    }

    pub fn set_tools(&self, tools: Vec<Arc<dyn Tool>>) {
        *self.0.tools.write().unwrap_or_else(PoisonError::into_inner) = tools;
    }

    pub fn add_handoff(&self, agent: Agent) {
        self.0.handoffs.write().unwrap_or_else(PoisonError::into_inner).push(agent);
    }

    pub fn set_handoffs(&self, agents: Vec<Agent>) {
        *self.0.handoffs.write().unwrap_or_else(PoisonError::into_inner) = agents;
    }

    /// 生成本轮的名称 -> 能力查找表（遵循 ignore_tools / ignore_handoffs）
    pub fn capabilities(&self) -> ToolRegistry {
        self.capabilities_excluding(&[])
    }

    /// 同 capabilities，但排除指定名称
    pub fn capabilities_excluding(&self, exclude: &[&str]) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        if !self.0.ignore_tools {
            for tool in self.tools() {
                if !exclude.contains(&tool.name()) {
                    registry.register(tool);
                }
            }
        }
        if !self.0.ignore_handoffs {
            for agent in self.handoffs() {
                if !exclude.contains(&agent.name()) {
                    registry.register_handoff(agent);
                }
            }
        }
        registry
    }

    /// 暴露给后端的工具描述
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.capabilities().descriptors()
    }

    /// 是否为同一个 Agent 实例
    pub fn ptr_eq(&self, other: &Agent) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 委派列表只输出名称，避免互相引用时无限递归
        let handoffs: Vec<String> = self.handoffs().iter().map(|a| a.name().to_string()).collect();
        let tools: Vec<String> = self.tools().iter().map(|t| t.name().to_string()).collect();
        f.debug_struct("Agent")
            .field("name", &self.0.name)
            .field("tools", &tools)
            .field("handoffs", &handoffs)
            .field("execute_tools", &self.0.execute_tools)
            .field("parallel_execute", &self.0.parallel_execute)
            .finish()
    }
}

#[derive(Serialize)]
struct AgentSummary<'a> {
    name: &'a str,
    persona: &'a str,
    description: &'a str,
    tools: Vec<String>,
    handoffs: Vec<String>,
}

impl Serialize for Agent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        AgentSummary {
            name: &self.0.name,
            persona: &self.0.persona,
            description: &self.0.description,
            tools: self.tools().iter().map(|t| t.name().to_string()).collect(),
            handoffs: self.handoffs().iter().map(|a| a.name().to_string()).collect(),
        }
        .serialize(serializer)
    }
}
