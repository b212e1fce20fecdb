//! DART - Rust 多智能体运行时
//!
//! 模块划分：
//! - **agent**: Agent 句柄（角色设定、工具、委派列表、执行开关）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、消息、运行状态、多 Agent 编排
//! - **dag**: 任务依赖图、校验与有界并发调度
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Scripted）
//! - **observability**: tracing 订阅器
//! - **runtime**: 流式合并、会话引擎、过程事件
//! - **tools**: 工具 trait、注册表、分发器

pub mod agent;
pub mod config;
pub mod core;
pub mod dag;
pub mod llm;
pub mod observability;
pub mod runtime;
pub mod tools;

pub use agent::{Agent, AgentBuilder};
pub use core::{AgentError, Message, MultiAgentEvent, MultiAgentRuntime, Role};
pub use dag::{DagEvent, DagScheduler, Task, TaskBuilder, TaskState};
pub use runtime::{RunOptions, RunOutcome, Runtime, RuntimeEvent};
