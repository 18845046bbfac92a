//! Echo 工具（测试用）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{ParamType, ParameterSpec, Tool, ToolContext, ToolFailure};

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back (for testing)"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::required("text", ParamType::String).describe("message to echo")]
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        }))
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolFailure> {
        let text = args.get("text").and_then(|v| v.as_str()).unwrap_or("(empty)");
        Ok(json!({ "text": text }))
    }
}
