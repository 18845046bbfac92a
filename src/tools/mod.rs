//! 工具层：注册表、契约执行器、Schema 辅助与内置工具（echo / datetime_tool）

pub mod datetime;
pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;

pub use datetime::{DateTimeTool, DATETIME_TOOL};
pub use echo::EchoTool;
pub use executor::{classify_failure, ToolExecutor, ToolResult};
pub use registry::{ParamType, ParameterSpec, Tool, ToolContext, ToolFailure, ToolRegistry};
pub use schema::decision_format_schema_json;
