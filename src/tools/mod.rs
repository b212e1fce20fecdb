//! 工具层：工具 trait 与注册表、参数 schema、调用结果、分发执行器

pub mod echo;
pub mod executor;
pub mod registry;
pub mod result;
pub mod schema;

pub use echo::EchoTool;
pub use executor::{ToolDispatcher, DEFAULT_MAX_PARALLEL_TOOLS};
pub use registry::{Capability, FunctionTool, Tool, ToolOutput, ToolRegistry};
pub use result::{ToolResult, ToolResultKind, ToolResultValue};
pub use schema::{ParamType, ToolDescriptor, ToolParameter};
