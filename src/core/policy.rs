//! 策略引擎
//!
//! 把 Planner 的 Decision 结合上一次 Observation 与运行级 ErrorHandlingPolicy 解析为可执行的 Action：
//! 重试（带退避等待）、备用工具、向用户提问或终止。纯决策表，同样的输入总是得到同样的 Action。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::backoff::{BackoffStrategy, RetryPolicy};
use crate::core::decision::{Action, Decision, ToolCall};
use crate::core::error::ToolErrorCode;
use crate::core::state::AgentState;
use crate::observation::Observation;
use crate::tools::{ToolResult, ToolRegistry};

/// 运行级失败容忍度
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandlingPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub use_fallbacks: bool,
    pub ask_user_when_missing_fields: bool,
}

impl Default for ErrorHandlingPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(500),
            use_fallbacks: true,
            ask_user_when_missing_fields: true,
        }
    }
}

/// 策略引擎：只读工具注册表（查询重试形状与备用工具）
pub struct PolicyEngine {
    registry: Arc<ToolRegistry>,
}

impl PolicyEngine {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// 解析本回合的 Action。last_observation 为空时回退到 state 中记录的上一次观察
    pub fn resolve(
        &self,
        decision: &Decision,
        last_observation: Option<&Observation>,
        policy: &ErrorHandlingPolicy,
        state: &AgentState,
    ) -> Action {
        match decision {
            Decision::CallTool(call) => {
                let last = last_observation.or(state.last_observation.as_ref());
                self.resolve_call(call, last, policy)
            }
            Decision::AskUser {
                question,
                missing_fields,
            } => Action::AskUser {
                question: question.clone(),
                missing_fields: missing_fields.clone(),
            },
            Decision::Stop { reason } => Action::Stop {
                reason: reason.clone(),
            },
            Decision::Replan { subgoals } => Action::Replan {
                subgoals: subgoals.clone(),
            },
        }
    }

    fn resolve_call(
        &self,
        call: &ToolCall,
        last: Option<&Observation>,
        policy: &ErrorHandlingPolicy,
    ) -> Action {
        // 只有「同一调用」的上一次失败才参与决策；换了调用就是新的第一次尝试
        let failed = match last {
            Some(obs) if !obs.result.ok && obs.result.call.same_call(call) => &obs.result,
            _ => return Action::call(call.clone()),
        };

        let code = failed.error_code;
        if code.is_transient() {
            let retry = self.retry_policy_for(call, policy);
            if failed.attempt <= retry.max_retries {
                let mut wait = retry.delay_for(failed.attempt, &call.name);
                if let Some(hint) = failed.retry_after {
                    wait = wait.max(hint);
                }
                tracing::debug!(
                    tool = %call.name,
                    attempt = failed.attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    "retrying transient failure"
                );
                return Action::CallTool {
                    call: call.clone(),
                    attempt: failed.attempt + 1,
                    wait,
                };
            }
        }

        self.escalate(call, failed, policy)
    }

    /// 有效重试形状：工具自带策略时，上限取两者较小值
    fn retry_policy_for(&self, call: &ToolCall, policy: &ErrorHandlingPolicy) -> RetryPolicy {
        let declared = self.registry.get(&call.name).and_then(|t| t.retry_policy());
        match declared {
            Some(mut p) => {
                p.max_retries = p.max_retries.min(policy.max_retries);
                p
            }
            None => RetryPolicy::new(
                policy.max_retries,
                policy.base_backoff,
                BackoffStrategy::Exponential,
            ),
        }
    }

    fn escalate(&self, call: &ToolCall, failed: &ToolResult, policy: &ErrorHandlingPolicy) -> Action {
        match failed.error_code {
            ToolErrorCode::InvalidInput => {
                if policy.ask_user_when_missing_fields && !failed.missing_fields.is_empty() {
                    return Action::AskUser {
                        question: format!(
                            "Tool '{}' needs values for: {}. Please provide them.",
                            call.name,
                            failed.missing_fields.join(", ")
                        ),
                        missing_fields: failed.missing_fields.clone(),
                    };
                }
            }
            ToolErrorCode::NotFound => {}
            _ => {
                if let Some(fallback) = self.fallback_for(call, policy) {
                    tracing::info!(tool = %call.name, fallback = %fallback, "substituting fallback tool");
                    return Action::call(ToolCall::new(fallback, call.args.clone()));
                }
            }
        }
        Action::Stop {
            reason: unrecoverable_reason(failed),
        }
    }

    fn fallback_for(&self, call: &ToolCall, policy: &ErrorHandlingPolicy) -> Option<String> {
        if !policy.use_fallbacks {
            return None;
        }
        let tool = self.registry.get(&call.name)?;
        let fallback = tool.fallback()?;
        if fallback == call.name || self.registry.get(fallback).is_none() {
            return None;
        }
        Some(fallback.to_string())
    }
}

fn unrecoverable_reason(failed: &ToolResult) -> String {
    format!(
        "Unrecoverable failure of tool '{}' ({}) after {} attempt(s): {}",
        failed.tool_name(),
        failed.error_code,
        failed.attempt,
        failed.error_detail.as_deref().unwrap_or("no detail")
    )
}
