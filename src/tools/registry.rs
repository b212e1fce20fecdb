//! 工具注册表
//!
//! 普通工具实现 Tool trait（name / description / parameters_schema / execute）；
//! 委派 Agent 以 Capability::Delegate 形式出现在同一张表里，分发时按变体区分，
//! 不需要为每个 handoff 动态生成包装函数。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::agent::Agent;
use crate::runtime::prompt::handoff_doc;
use crate::tools::schema::{empty_schema, parameters_schema, schema_for_args, ToolDescriptor, ToolParameter};

/// 工具返回值：文本、委派 Agent 或无返回
#[derive(Debug, Clone)]
pub enum ToolOutput {
    Text(String),
    Agent(Agent),
    None,
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        ToolOutput::Text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        ToolOutput::Text(s.to_string())
    }
}

impl From<Agent> for ToolOutput {
    fn from(a: Agent) -> Self {
        ToolOutput::Agent(a)
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON 对象）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（后端 tool call 中的 function.name）
    fn name(&self) -> &str;

    /// 工具文档
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        empty_schema()
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<ToolOutput, String>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

type ToolFn = dyn Fn(Value) -> BoxFuture<'static, Result<ToolOutput, String>> + Send + Sync;

/// 由闭包构造的工具
pub struct FunctionTool {
    name: String,
    description: String,
    schema: Value,
    func: Arc<ToolFn>,
}

impl FunctionTool {
    /// 以参数列表声明 schema，闭包接收原始 JSON 参数
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        params: &[ToolParameter],
        func: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema: parameters_schema(params),
            func: Arc::new(move |args: Value| func(args).boxed()),
        }
    }

    /// 以参数结构体生成 schema，参数在调用前反序列化为 A
    pub fn typed<A, F, Fut>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, String>> + Send + 'static,
    {
        let func = Arc::new(func);
        Self {
            name: name.into(),
            description: description.into(),
            schema: schema_for_args::<A>(),
            func: Arc::new(move |args: Value| {
                let func = Arc::clone(&func);
                async move {
                    let parsed: A = serde_json::from_value(args).map_err(|e| e.to_string())?;
                    func(parsed).await
                }
                .boxed()
            }),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
        (self.func)(args).await
    }
}

/// 可调用能力：普通工具或委派 Agent
#[derive(Clone)]
pub enum Capability {
    Native(Arc<dyn Tool>),
    Delegate(Agent),
}

impl Capability {
    pub fn name(&self) -> String {
        match self {
            Capability::Native(tool) => tool.name().to_string(),
            Capability::Delegate(agent) => agent.name().to_string(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            Capability::Native(tool) => tool.description().to_string(),
            Capability::Delegate(agent) => handoff_doc(agent),
        }
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        match self {
            Capability::Native(tool) => tool.descriptor(),
            Capability::Delegate(_) => ToolDescriptor {
                name: self.name(),
                description: self.description(),
                parameters: empty_schema(),
            },
        }
    }
}

/// 工具注册表：名称 -> 能力；同名时普通工具优先于委派 Agent
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    handoffs: HashMap<String, Agent>,
    /// 注册顺序，用于稳定地生成描述列表
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if !self.order.contains(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    pub fn register_handoff(&mut self, agent: Agent) {
        let name = agent.name().to_string();
        if !self.order.contains(&name) {
            self.order.push(name.clone());
        }
        self.handoffs.insert(name, agent);
    }

    /// 按名称解析：先查普通工具，再查委派 Agent
    pub fn resolve(&self, name: &str) -> Option<Capability> {
        if let Some(tool) = self.tools.get(name) {
            return Some(Capability::Native(Arc::clone(tool)));
        }
        self.handoffs.get(name).cloned().map(Capability::Delegate)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// 按注册顺序生成暴露给后端的工具描述
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.resolve(name))
            .map(|cap| cap.descriptor())
            .collect()
    }
}
