//! 核心层：错误类型、对话消息、运行状态记录、多 Agent 编排

pub mod error;
pub mod message;
pub mod orchestrator;
pub mod status;

pub use error::AgentError;
pub use message::{FunctionCall, Message, Role, ToolCall};
pub use orchestrator::{AgentTaskExecutor, MultiAgentEvent, MultiAgentRuntime, MultiAgentSnapshot, TaskResult};
pub use status::{DagRunState, MultiAgentStatus, RuntimeStatus, TaskSummary};
