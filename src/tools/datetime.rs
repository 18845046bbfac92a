//! 日期时间工具：返回当前时间（UTC）
//!
//! 是 Planner 别名表 "Date Time Tool" 的规范目标；空参数时默认 operation = "now"。

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::tools::{ParamType, ParameterSpec, Tool, ToolContext, ToolFailure};

pub const DATETIME_TOOL: &str = "datetime_tool";

pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        DATETIME_TOOL
    }

    fn description(&self) -> &str {
        "Current date and time in UTC"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::optional("operation", ParamType::String)
            .one_of(vec![json!("now"), json!("today"), json!("timestamp")])
            .default_value(json!("now"))]
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "operation": {"type": "string"},
                "value": {"type": ["string", "integer"]}
            },
            "required": ["operation", "value"]
        }))
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolFailure> {
        let now = Utc::now();
        let operation = args.get("operation").and_then(Value::as_str).unwrap_or("now");
        let value = match operation {
            "now" => json!(now.to_rfc3339()),
            "today" => json!(now.format("%Y-%m-%d").to_string()),
            "timestamp" => json!(now.timestamp()),
            other => return Err(ToolFailure::Failed(format!("unsupported operation: {other}"))),
        };
        Ok(json!({ "operation": operation, "value": value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolCall;
    use crate::tools::{ToolExecutor, ToolRegistry};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_default_operation_is_now() {
        let mut registry = ToolRegistry::new();
        registry.register(DateTimeTool);
        let executor = ToolExecutor::new(Arc::new(registry), 5);
        let r = executor
            .execute(&ToolCall::new(DATETIME_TOOL, json!({})), 1, &CancellationToken::new())
            .await;
        assert!(r.ok, "{:?}", r.error_detail);
        assert_eq!(r.data["operation"], json!("now"));
    }

    #[tokio::test]
    async fn test_rejects_unknown_operation() {
        let mut registry = ToolRegistry::new();
        registry.register(DateTimeTool);
        let executor = ToolExecutor::new(Arc::new(registry), 5);
        let r = executor
            .execute(
                &ToolCall::new(DATETIME_TOOL, json!({"operation": "yesterday"})),
                1,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(r.error_code, crate::core::ToolErrorCode::InvalidInput);
    }
}
