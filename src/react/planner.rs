//! Planner：根据 AgentState 构建提示、调用一次 LLM、解析为 Decision
//!
//! 这里不做重试：重试属于策略引擎在动作层面的职责。解析失败作为本回合的致命错误向上传播。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, AgentState, Decision};
use crate::llm::{LlmClient, Prompt, SamplingConfig};
use crate::react::parser::parse_decision;
use crate::tools::{decision_format_schema_json, ToolRegistry};

/// 默认的基础 system prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an orchestration agent. Each turn you choose exactly one next move \
toward the user's goal: call one tool, ask the user for missing information, replan into subgoals, or stop.";

const RESPONSE_RULES: &str = "Rules:\n\
- Output exactly one JSON object and nothing else.\n\
- Use only tools listed under Available tools, with their declared parameters.\n\
- When the goal is achieved, stop with a reason that contains the word \"achieved\".\n\
- Ask the user only when a required value cannot be obtained with a tool.";

/// Planner：持有 LLM、工具目录与 system prompt
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    system_prompt: String,
    sampling: SamplingConfig,
}

impl Planner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            registry,
            system_prompt: system_prompt.into(),
            sampling: SamplingConfig::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// system：基础 prompt + 决策格式 schema + 规则；user：目标 / 子目标 / 预算 / 工具目录 / 上次观察 / Critic / 工作记忆
    pub fn build_prompt(&self, state: &AgentState) -> Prompt {
        let system = format!(
            "{}\n\nRespond with a JSON object matching this schema:\n{}\n\n{}",
            self.system_prompt,
            decision_format_schema_json(),
            RESPONSE_RULES
        );

        let mut user = format!("## Goal\n{}\n\n", state.goal.text);
        if !state.goal.constraints.is_empty() {
            user.push_str("## Constraints\n");
            for c in &state.goal.constraints {
                user.push_str(&format!("- {}\n", c));
            }
            user.push('\n');
        }
        if !state.subgoals.is_empty() {
            user.push_str("## Remaining subgoals\n");
            for (i, g) in state.subgoals.iter().enumerate() {
                user.push_str(&format!("{}. {}\n", i + 1, g));
            }
            user.push('\n');
        }
        user.push_str(&format!(
            "## Budget\nTurn {} of {} ({} remaining), time limit {}s\n\n",
            state.turn_index + 1,
            state.budget.max_turns,
            state.budget.remaining_turns(state.turn_index),
            state.budget.max_duration.as_secs()
        ));
        user.push_str(&self.registry.catalog_section());
        user.push('\n');
        if let Some(obs) = &state.last_observation {
            user.push_str(&obs.to_prompt_section());
        }
        if let Some(critique) = &state.last_critique {
            user.push_str(&format!(
                "## Critic\n{} (recommendation: {:?})\n\n",
                critique.assessment, critique.recommendation
            ));
        }
        user.push_str(&state.digest.to_prompt_section());

        Prompt::new(system, user, self.sampling)
    }

    /// 产生本回合唯一的 Decision
    pub async fn decide(
        &self,
        state: &AgentState,
        cancel: &CancellationToken,
    ) -> Result<Decision, AgentError> {
        let prompt = self.build_prompt(state);
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            r = self.llm.complete(&prompt) => r?,
        };
        let decision = parse_decision(&output).map_err(|e| {
            tracing::warn!(error = %e, "planner output could not be parsed");
            e
        })?;
        tracing::debug!(kind = decision.kind(), "planner decided");
        Ok(decision)
    }
}
