//! 工具执行器（工具契约层）
//!
//! 每次工具调用都经过这里：查找 -> 输入校验 -> 带超时调用 -> 输出校验。
//! 失败按固定表归类为 ToolErrorCode，结果总是带上耗时与 attempt；每次调用输出结构化审计日志（JSON）。
//! 执行器本身不持有可变状态，同样的输入得到同样的结果。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{ToolCall, ToolErrorCode};
use crate::tools::schema::{apply_defaults, input_schema, missing_required, repair_output, validate};
use crate::tools::{ToolContext, ToolFailure, ToolRegistry};

/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// 一次工具调用的结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// 原始调用（用于判断下一次决策是否为「同一调用」）
    pub call: ToolCall,
    pub ok: bool,
    /// 工具输出；输出 schema 不匹配时为未校验的原始数据
    pub data: Value,
    pub error_code: ToolErrorCode,
    pub error_detail: Option<String>,
    pub schema_validated: bool,
    pub attempt: u32,
    pub latency: Duration,
    /// InvalidInput 时缺失的必填参数
    #[serde(default)]
    pub missing_fields: Vec<String>,
    /// RateLimited 时工具给出的等待提示
    #[serde(default)]
    pub retry_after: Option<Duration>,
    /// 输出经过有界修复
    #[serde(default)]
    pub repaired: bool,
}

impl ToolResult {
    fn success(call: &ToolCall, data: Value, attempt: u32) -> Self {
        Self {
            call: call.clone(),
            ok: true,
            data,
            error_code: ToolErrorCode::None,
            error_detail: None,
            schema_validated: true,
            attempt,
            latency: Duration::ZERO,
            missing_fields: Vec::new(),
            retry_after: None,
            repaired: false,
        }
    }

    fn failure(call: &ToolCall, code: ToolErrorCode, detail: impl Into<String>, attempt: u32) -> Self {
        Self {
            call: call.clone(),
            ok: false,
            data: Value::Null,
            error_code: code,
            error_detail: Some(detail.into()),
            schema_validated: false,
            attempt,
            latency: Duration::ZERO,
            missing_fields: Vec::new(),
            retry_after: None,
            repaired: false,
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.call.name
    }
}

/// 工具失败 -> 错误码的固定映射表
pub fn classify_failure(failure: &ToolFailure) -> ToolErrorCode {
    match failure {
        ToolFailure::Retryable {
            rate_limited: true, ..
        } => ToolErrorCode::RateLimited,
        ToolFailure::Retryable { .. } => ToolErrorCode::RetryableServer,
        ToolFailure::Unauthorized(_) => ToolErrorCode::Unauthorized,
        ToolFailure::Forbidden(_) => ToolErrorCode::Forbidden,
        ToolFailure::NoResults(_) => ToolErrorCode::NoResults,
        ToolFailure::Failed(_) => ToolErrorCode::ToolBug,
    }
}

fn failure_detail(failure: &ToolFailure) -> String {
    match failure {
        ToolFailure::Retryable { message, .. } => message.clone(),
        ToolFailure::Unauthorized(m)
        | ToolFailure::Forbidden(m)
        | ToolFailure::NoResults(m)
        | ToolFailure::Failed(m) => m.clone(),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

enum Invocation {
    Returned(Result<Value, ToolFailure>),
    Panicked(String),
    TimedOut(Duration),
    Cancelled,
}

/// 工具执行器：对每次调用做契约校验、施加超时，并将失败映射为 ToolErrorCode
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    default_timeout: Duration,
    working_dir: PathBuf,
    env: HashMap<String, String>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            default_timeout: Duration::from_secs(timeout_secs),
            working_dir: PathBuf::from("."),
            env: HashMap::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 执行一次调用；任何失败都体现在 ToolResult 中，不会返回 Err
    pub async fn execute(
        &self,
        call: &ToolCall,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let start = Instant::now();
        let mut result = self.execute_inner(call, attempt, cancel).await;
        result.latency = start.elapsed();

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "ok": result.ok,
            "error_code": result.error_code.as_str(),
            "attempt": attempt,
            "duration_ms": result.latency.as_millis() as u64,
            "args_preview": args_preview(&call.args),
        });
        tracing::info!(audit = %audit, "tool");
        if result.error_code == ToolErrorCode::ToolBug {
            tracing::error!(
                tool = %call.name,
                attempt,
                detail = result.error_detail.as_deref().unwrap_or(""),
                "tool raised an unexpected failure"
            );
        }
        result
    }

    async fn execute_inner(
        &self,
        call: &ToolCall,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let Some(tool) = self.registry.get(&call.name) else {
            return ToolResult::failure(
                call,
                ToolErrorCode::NotFound,
                format!("Unknown tool: {}", call.name),
                attempt,
            );
        };

        // 1. 输入校验先于调用
        let params = tool.parameters();
        let args = apply_defaults(&call.args, &params);
        let violations = validate(&input_schema(&params), &args);
        if !violations.is_empty() {
            let mut result = ToolResult::failure(
                call,
                ToolErrorCode::InvalidInput,
                violations.join("; "),
                attempt,
            );
            result.missing_fields = missing_required(&args, &params);
            return result;
        }

        // 2. 调用：派生令牌，超时或运行取消都会触发它
        let timeout = tool.timeout().unwrap_or(self.default_timeout);
        let child = cancel.child_token();
        let ctx = ToolContext {
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
            attempt,
            cancel: child.clone(),
        };
        let invocation = {
            let fut = AssertUnwindSafe(tool.execute(args, &ctx)).catch_unwind();
            tokio::select! {
                biased;
                _ = child.cancelled() => Invocation::Cancelled,
                r = tokio::time::timeout(timeout, fut) => match r {
                    Err(_) => Invocation::TimedOut(timeout),
                    Ok(Err(payload)) => Invocation::Panicked(panic_message(payload)),
                    Ok(Ok(returned)) => Invocation::Returned(returned),
                },
            }
        };
        child.cancel();

        let data = match invocation {
            Invocation::Cancelled => {
                return ToolResult::failure(call, ToolErrorCode::Timeout, "cancelled", attempt)
            }
            Invocation::TimedOut(d) => {
                return ToolResult::failure(
                    call,
                    ToolErrorCode::Timeout,
                    format!("timed out after {}ms", d.as_millis()),
                    attempt,
                )
            }
            Invocation::Panicked(msg) => {
                return ToolResult::failure(
                    call,
                    ToolErrorCode::ToolBug,
                    format!("tool panicked: {msg}"),
                    attempt,
                )
            }
            Invocation::Returned(Err(failure)) => {
                let mut result = ToolResult::failure(
                    call,
                    classify_failure(&failure),
                    failure_detail(&failure),
                    attempt,
                );
                if let ToolFailure::Retryable { retry_after, .. } = failure {
                    result.retry_after = retry_after;
                }
                return result;
            }
            Invocation::Returned(Ok(data)) => data,
        };

        // 3. 输出校验后于调用
        if let Some(schema) = tool.output_schema() {
            let violations = validate(&schema, &data);
            if !violations.is_empty() {
                let mut result = ToolResult::failure(
                    call,
                    ToolErrorCode::OutputSchemaMismatch,
                    violations.join("; "),
                    attempt,
                );
                result.data = data;
                return result;
            }
        }
        ToolResult::success(call, data, attempt)
    }

    /// 对 OutputSchemaMismatch 结果做有界修复；修复后仍需通过输出 schema
    pub fn repair(&self, result: &ToolResult) -> Option<ToolResult> {
        if result.error_code != ToolErrorCode::OutputSchemaMismatch {
            return None;
        }
        let schema = self.registry.get(result.tool_name())?.output_schema()?;
        let fixed = repair_output(&result.data, &schema)?;
        tracing::debug!(tool = %result.tool_name(), "repaired tool output");
        Some(ToolResult {
            ok: true,
            data: fixed,
            error_code: ToolErrorCode::None,
            error_detail: None,
            schema_validated: true,
            repaired: true,
            ..result.clone()
        })
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, ParamType, ParameterSpec, Tool};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedTool {
        name: &'static str,
        outcome: Result<Value, ToolFailure>,
        output_schema: Option<Value>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedTool {
        fn new(name: &'static str, outcome: Result<Value, ToolFailure>) -> Self {
            Self {
                name,
                outcome,
                output_schema: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Tool for ScriptedTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "scripted"
        }
        fn parameters(&self) -> Vec<ParameterSpec> {
            vec![ParameterSpec::required("q", ParamType::String)]
        }
        fn output_schema(&self) -> Option<Value> {
            self.output_schema.clone()
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolFailure> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        }
    }

    struct PanickyTool;

    #[async_trait]
    impl Tool for PanickyTool {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "panics"
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolFailure> {
            panic!("boom");
        }
    }

    fn executor_with(tool: impl Tool + 'static) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(tool);
        registry.register(EchoTool);
        ToolExecutor::new(Arc::new(registry), 5)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let executor = executor_with(SlowTool);
        let call = ToolCall::new("nope", json!({}));
        let r = executor.execute(&call, 1, &CancellationToken::new()).await;
        assert!(!r.ok);
        assert_eq!(r.error_code, ToolErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_invalid_input_skips_invocation() {
        let tool = ScriptedTool::new("search", Ok(json!({})));
        let calls = tool.calls.clone();
        let executor = executor_with(tool);
        let call = ToolCall::new("search", json!({}));
        let r = executor.execute(&call, 1, &CancellationToken::new()).await;
        assert_eq!(r.error_code, ToolErrorCode::InvalidInput);
        assert!(!r.schema_validated);
        assert_eq!(r.missing_fields, vec!["q".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_mapping_table() {
        let cases = vec![
            (ToolFailure::retryable("503"), ToolErrorCode::RetryableServer),
            (
                ToolFailure::rate_limited("429", Some(Duration::from_secs(2))),
                ToolErrorCode::RateLimited,
            ),
            (ToolFailure::Unauthorized("401".into()), ToolErrorCode::Unauthorized),
            (ToolFailure::Forbidden("403".into()), ToolErrorCode::Forbidden),
            (ToolFailure::NoResults("empty".into()), ToolErrorCode::NoResults),
            (ToolFailure::Failed("npe".into()), ToolErrorCode::ToolBug),
        ];
        for (failure, code) in cases {
            let executor = executor_with(ScriptedTool::new("t", Err(failure)));
            let r = executor
                .execute(&ToolCall::new("t", json!({"q": "x"})), 2, &CancellationToken::new())
                .await;
            assert!(!r.ok);
            assert_eq!(r.error_code, code);
            assert_eq!(r.attempt, 2);
        }
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let executor = executor_with(ScriptedTool::new(
            "t",
            Err(ToolFailure::rate_limited("429", Some(Duration::from_secs(3)))),
        ));
        let r = executor
            .execute(&ToolCall::new("t", json!({"q": "x"})), 1, &CancellationToken::new())
            .await;
        assert_eq!(r.retry_after, Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_result() {
        let executor = executor_with(SlowTool);
        let r = executor
            .execute(&ToolCall::new("slow", json!({})), 1, &CancellationToken::new())
            .await;
        assert_eq!(r.error_code, ToolErrorCode::Timeout);
        assert!(r.latency >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_run_cancellation_surfaces_as_timeout() {
        let executor = executor_with(SlowTool);
        let token = CancellationToken::new();
        token.cancel();
        let r = executor
            .execute(&ToolCall::new("slow", json!({})), 1, &token)
            .await;
        assert_eq!(r.error_code, ToolErrorCode::Timeout);
        assert_eq!(r.error_detail.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_panic_is_tool_bug() {
        let executor = executor_with(PanickyTool);
        let r = executor
            .execute(&ToolCall::new("panicky", json!({})), 1, &CancellationToken::new())
            .await;
        assert_eq!(r.error_code, ToolErrorCode::ToolBug);
        assert!(r.error_detail.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_output_schema_mismatch_keeps_raw_data_and_repairs() {
        let mut tool = ScriptedTool::new("weather", Ok(json!({"temp": 20})));
        tool.output_schema = Some(json!({
            "type": "object",
            "properties": {"temperature": {"type": "number"}},
            "required": ["temperature"]
        }));
        let executor = executor_with(tool);
        let r = executor
            .execute(&ToolCall::new("weather", json!({"q": "x"})), 1, &CancellationToken::new())
            .await;
        assert_eq!(r.error_code, ToolErrorCode::OutputSchemaMismatch);
        assert_eq!(r.data, json!({"temp": 20}));

        let fixed = executor.repair(&r).unwrap();
        assert!(fixed.ok);
        assert!(fixed.repaired);
        assert_eq!(fixed.data, json!({"temperature": 20}));
    }

    #[tokio::test]
    async fn test_identical_calls_yield_identical_results() {
        let executor = executor_with(SlowTool);
        let call = ToolCall::new("echo", json!({"text": "hi"}));
        let token = CancellationToken::new();
        let a = executor.execute(&call, 1, &token).await;
        let b = executor.execute(&call, 1, &token).await;
        assert_eq!(a.error_code, ToolErrorCode::None);
        assert_eq!(b.error_code, ToolErrorCode::None);
        assert_eq!(a.data, b.data);
        assert!(a.ok && b.ok && a.schema_validated && b.schema_validated);
    }
}
