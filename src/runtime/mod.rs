//! 会话运行时：流式合并、会话引擎、过程事件与提示词

pub mod choice;
pub mod engine;
pub mod events;
pub mod prompt;

pub use choice::{Choice, ChoiceDelta, FunctionDelta, ToolCallDelta};
pub use engine::{RunOptions, RunOutcome, Runtime};
pub use events::RuntimeEvent;
