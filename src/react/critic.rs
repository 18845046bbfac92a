//! Critic：评估工具 Observation 是否满足目标
//!
//! 在将 Observation 喂回 Planner 前做一次轻量 LLM 调用，给出 Critique（是否满足目标 + 建议）。
//! 契约是固定的：总是返回一个 Critique。模型失败、取消或工具不在评估范围内时返回中性的 Continue。
//!
//! 通过配置可以：
//! - 启用/禁用 Critic
//! - 使用与 Planner 不同的采样参数
//! - 仅评估特定工具（减少 token 开销）

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::CriticSection;
use crate::core::{Critique, Goal, Recommendation};
use crate::llm::{LlmClient, Prompt, SamplingConfig};
use crate::observation::Observation;
use crate::react::parser::strip_code_fence;

/// 默认评估模板；占位符 {goal} {tool} {observation}
pub const DEFAULT_CRITIC_TEMPLATE: &str = "Goal: {goal}\n\nThe tool '{tool}' just returned:\n{observation}\n\
Does this result satisfy the goal? Answer with one JSON object.";

const CRITIC_SYSTEM: &str = "You review tool results for an agent. Reply with exactly one JSON object: \
{\"assessment\": string, \"goal_satisfied\": bool, \"recommendation\": \"continue\" | \"replan\" | \"clarify\" | \"stop\"}. \
Set goal_satisfied only when the result fully achieves the goal.";

#[derive(Deserialize)]
struct CritiqueReply {
    #[serde(default)]
    assessment: String,
    #[serde(default)]
    goal_satisfied: bool,
    #[serde(default)]
    recommendation: Option<String>,
}

fn recommendation_from(text: Option<&str>) -> Recommendation {
    match text.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("replan") => Recommendation::Replan,
        Some("clarify") => Recommendation::Clarify,
        Some("stop") => Recommendation::Stop,
        _ => Recommendation::Continue,
    }
}

/// 把模型回复解析为 Critique：优先 JSON；以 OK 开头的纯文本视为通过；其它文本作为评估内容
pub fn parse_critique(output: &str) -> Critique {
    let body = strip_code_fence(output);
    if let Ok(reply) = serde_json::from_str::<CritiqueReply>(body) {
        return Critique {
            assessment: reply.assessment,
            goal_satisfied: reply.goal_satisfied,
            recommendation: recommendation_from(reply.recommendation.as_deref()),
        };
    }
    if body.is_empty() || body.to_uppercase().starts_with("OK") {
        return Critique::neutral("OK");
    }
    Critique::neutral(body)
}

/// Critic：持有 LLM 与 prompt 模板，assess(goal, observation) 总是返回 Critique
pub struct Critic {
    llm: Arc<dyn LlmClient>,
    prompt_template: String,
    sampling: SamplingConfig,
    /// 是否评估所有工具
    evaluate_all_tools: bool,
    /// 仅评估的工具集合（evaluate_all_tools=false 时生效）
    evaluate_tools: HashSet<String>,
}

impl Critic {
    /// 从配置创建 Critic（需要外部传入 LLM 实例）
    pub fn from_config(llm: Arc<dyn LlmClient>, config: &CriticSection) -> Self {
        Self {
            llm,
            prompt_template: config.prompt_template.clone(),
            sampling: config.sampling(),
            evaluate_all_tools: config.evaluate_all_tools,
            evaluate_tools: config.evaluate_tools.iter().cloned().collect(),
        }
    }

    pub fn new(llm: Arc<dyn LlmClient>, prompt_template: impl Into<String>) -> Self {
        Self {
            llm,
            prompt_template: prompt_template.into(),
            sampling: SamplingConfig {
                max_tokens: 256,
                temperature: 0.0,
            },
            evaluate_all_tools: true,
            evaluate_tools: HashSet::new(),
        }
    }

    /// 设置仅评估特定工具
    pub fn with_evaluate_tools(mut self, tools: Vec<String>) -> Self {
        self.evaluate_all_tools = false;
        self.evaluate_tools = tools.into_iter().collect();
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    /// 检查是否应该评估此工具
    fn should_evaluate(&self, tool: &str) -> bool {
        if self.evaluate_all_tools || self.evaluate_tools.is_empty() {
            return true;
        }
        self.evaluate_tools.contains(tool)
    }

    fn build_prompt(&self, goal: &Goal, observation: &Observation) -> Prompt {
        let user = self
            .prompt_template
            .replace("{goal}", &goal.text)
            .replace("{tool}", &observation.tool)
            .replace("{observation}", &observation.to_prompt_section());
        Prompt::new(CRITIC_SYSTEM, user, self.sampling)
    }

    pub async fn assess(
        &self,
        goal: &Goal,
        observation: &Observation,
        cancel: &CancellationToken,
    ) -> Critique {
        if !self.should_evaluate(&observation.tool) {
            return Critique::neutral(format!("not evaluated for tool '{}'", observation.tool));
        }

        let prompt = self.build_prompt(goal, observation);
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Critique::neutral("critic cancelled"),
            r = self.llm.complete(&prompt) => r,
        };
        match reply {
            Ok(text) => {
                let critique = parse_critique(&text);
                tracing::debug!(
                    tool = %observation.tool,
                    goal_satisfied = critique.goal_satisfied,
                    recommendation = ?critique.recommendation,
                    "critic assessed observation"
                );
                critique
            }
            Err(e) => {
                tracing::warn!(tool = %observation.tool, error = %e, "critic unavailable, continuing");
                Critique::neutral(format!("critic unavailable: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ToolCall, ToolErrorCode};
    use crate::llm::{LlmError, MockLlmClient};
    use crate::observation::ObservationNormalizer;
    use crate::tools::ToolResult;
    use serde_json::json;
    use std::time::Duration;

    fn observation(tool: &str) -> Observation {
        let data = json!({"text": "hi"});
        let result = ToolResult {
            call: ToolCall::new(tool, json!({})),
            ok: true,
            data: data.clone(),
            error_code: ToolErrorCode::None,
            error_detail: None,
            schema_validated: true,
            attempt: 1,
            latency: Duration::ZERO,
            missing_fields: Vec::new(),
            retry_after: None,
            repaired: false,
        };
        ObservationNormalizer::default().normalize(tool, &data, &result)
    }

    #[test]
    fn test_should_evaluate_all() {
        let critic = Critic::new(Arc::new(MockLlmClient::default()), "test");
        assert!(critic.should_evaluate("any_tool"));
    }

    #[test]
    fn test_should_evaluate_specific() {
        let critic = Critic::new(Arc::new(MockLlmClient::default()), "test")
            .with_evaluate_tools(vec!["search".to_string(), "fetch".to_string()]);
        assert!(critic.should_evaluate("search"));
        assert!(critic.should_evaluate("fetch"));
        assert!(!critic.should_evaluate("echo"));
    }

    #[test]
    fn test_parse_json_critique() {
        let c = parse_critique(
            "```json\n{\"assessment\":\"done\",\"goal_satisfied\":true,\"recommendation\":\"Stop\"}\n```",
        );
        assert!(c.goal_satisfied);
        assert_eq!(c.recommendation, Recommendation::Stop);
        assert_eq!(c.assessment, "done");
    }

    #[test]
    fn test_parse_text_fallbacks() {
        assert_eq!(parse_critique("ok, looks fine"), Critique::neutral("OK"));
        let c = parse_critique("The result is for the wrong city.");
        assert!(!c.goal_satisfied);
        assert_eq!(c.recommendation, Recommendation::Continue);
        assert!(c.assessment.contains("wrong city"));
    }

    #[tokio::test]
    async fn test_assess_renders_template() {
        let llm = Arc::new(MockLlmClient::new(vec![
            r#"{"assessment":"greeting echoed","goal_satisfied":true}"#,
        ]));
        let critic = Critic::new(llm.clone(), DEFAULT_CRITIC_TEMPLATE);
        let c = critic
            .assess(&Goal::new("Say hi"), &observation("echo"), &CancellationToken::new())
            .await;
        assert!(c.goal_satisfied);
        let prompt = &llm.prompts()[0];
        assert!(prompt.user.contains("Say hi"));
        assert!(prompt.user.contains("'echo'"));
    }

    #[tokio::test]
    async fn test_model_failure_yields_neutral() {
        let llm = Arc::new(MockLlmClient::default());
        llm.push_error(LlmError::Timeout);
        let critic = Critic::new(llm, DEFAULT_CRITIC_TEMPLATE);
        let c = critic
            .assess(&Goal::new("g"), &observation("echo"), &CancellationToken::new())
            .await;
        assert!(!c.goal_satisfied);
        assert_eq!(c.recommendation, Recommendation::Continue);
    }

    #[tokio::test]
    async fn test_skipped_tool_does_not_call_model() {
        let llm = Arc::new(MockLlmClient::repeating("OK"));
        let critic = Critic::new(llm.clone(), DEFAULT_CRITIC_TEMPLATE)
            .with_evaluate_tools(vec!["search".to_string()]);
        let c = critic
            .assess(&Goal::new("g"), &observation("echo"), &CancellationToken::new())
            .await;
        assert!(!c.goal_satisfied);
        assert_eq!(llm.call_count(), 0);
    }
}
