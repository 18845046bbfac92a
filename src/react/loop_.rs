//! Agent 主循环
//!
//! 每回合：Decide -> Resolve -> 执行 Action（工具 -> 规范化 -> Critic）-> UpdateState -> 持久化。
//! 回合严格串行；预算与取消在每回合开始前检查。回合内的错误与 panic 在回合边界被捕获，
//! 转为失败的终止；无论以何种方式退出，都会清理持久化的状态。

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::core::{
    Action, AgentError, AgentResult, AgentState, Budget, ErrorHandlingPolicy, Goal, PolicyEngine,
    RunPhase, StateManager, ToolErrorCode,
};
use crate::observation::ObservationNormalizer;
use crate::react::events::{AgentEvent, EventBus};
use crate::react::{Critic, Planner};
use crate::tools::executor::panic_message;
use crate::tools::ToolExecutor;

pub const STOP_USER_INPUT: &str = "user input required";
pub const STOP_BUDGET: &str = "Budget exhausted";
pub const STOP_CANCELLED: &str = "Cancelled by user";

/// 本回合结束后的走向
struct TurnOutcome {
    next: AgentState,
    phase: RunPhase,
    /// 终止时的 (success, reason)
    stop: Option<(bool, String)>,
}

impl TurnOutcome {
    fn running(next: AgentState) -> Self {
        Self {
            next,
            phase: RunPhase::Running,
            stop: None,
        }
    }
}

/// Stop 动作是否表示目标达成：原因中包含 "achieved"（不区分大小写）
pub fn is_goal_achieved(reason: &str) -> bool {
    reason.to_lowercase().contains("achieved")
}

/// 编排运行时：组合 Planner / 策略引擎 / 工具执行器 / 规范化 / Critic / 状态管理
pub struct Agent {
    planner: Planner,
    policy_engine: PolicyEngine,
    executor: ToolExecutor,
    normalizer: ObservationNormalizer,
    critic: Option<Critic>,
    state_manager: StateManager,
    events: EventBus,
    repair_output: bool,
}

impl Agent {
    pub fn new(
        planner: Planner,
        policy_engine: PolicyEngine,
        executor: ToolExecutor,
        normalizer: ObservationNormalizer,
        state_manager: StateManager,
    ) -> Self {
        Self {
            planner,
            policy_engine,
            executor,
            normalizer,
            critic: None,
            state_manager,
            events: EventBus::new(),
            repair_output: true,
        }
    }

    pub fn with_critic(mut self, critic: Critic) -> Self {
        self.critic = Some(critic);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_repair_output(mut self, enabled: bool) -> Self {
        self.repair_output = enabled;
        self
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// 以新的 run id 运行到结束
    pub async fn run(
        &self,
        goal: Goal,
        budget: Budget,
        policy: &ErrorHandlingPolicy,
        cancel: CancellationToken,
    ) -> AgentResult {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.run_with_id(&run_id, goal, budget, policy, cancel).await
    }

    /// 以指定 run id 运行；存储中已有该 run 的状态时从中续跑（goal 与 budget 以存储的为准）
    pub async fn run_with_id(
        &self,
        run_id: &str,
        goal: Goal,
        budget: Budget,
        policy: &ErrorHandlingPolicy,
        cancel: CancellationToken,
    ) -> AgentResult {
        let start = Instant::now();
        let mut state = match self.state_manager.load_state(run_id, &cancel).await {
            Ok(Some(saved)) => {
                tracing::info!(run_id, turn = saved.turn_index, "resuming saved run");
                saved
            }
            Ok(None) => self.state_manager.create_initial_state(goal, budget),
            Err(e) => {
                tracing::warn!(run_id, error = %e, "could not load saved state, starting fresh");
                self.state_manager.create_initial_state(goal, budget)
            }
        };
        tracing::info!(run_id, goal = %state.goal.text, max_turns = state.budget.max_turns, "run started");

        let (phase, success, stop_reason) = loop {
            if cancel.is_cancelled() {
                break (RunPhase::Stopped, false, STOP_CANCELLED.to_string());
            }
            if state.budget.exhausted(state.turn_index, start.elapsed()) {
                break (RunPhase::Stopped, false, STOP_BUDGET.to_string());
            }

            let turn = state.turn_index + 1;
            self.events.emit(AgentEvent::TurnStarted {
                run_id: run_id.to_string(),
                turn,
            });
            let turn_start = Instant::now();

            let step = AssertUnwindSafe(self.turn(run_id, &state, policy, &cancel))
                .catch_unwind()
                .await;
            let outcome = match step {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(AgentError::Cancelled)) => {
                    break (RunPhase::Stopped, false, STOP_CANCELLED.to_string());
                }
                Ok(Err(e)) => {
                    tracing::error!(run_id, turn, error = %e, "turn failed");
                    break (RunPhase::Stopped, false, e.to_string());
                }
                Err(payload) => {
                    let e = AgentError::Panicked(panic_message(payload));
                    tracing::error!(run_id, turn, error = %e, "turn panicked");
                    break (RunPhase::Stopped, false, e.to_string());
                }
            };

            let action_type = outcome
                .next
                .last_action
                .as_ref()
                .map(Action::kind)
                .unwrap_or("none");
            self.events.emit(AgentEvent::TurnCompleted {
                run_id: run_id.to_string(),
                turn,
                duration_ms: turn_start.elapsed().as_millis() as u64,
                action_type: action_type.to_string(),
            });

            // 下一回合开始前先持久化本回合的状态；持久化失败只告警
            if let Err(e) = self.state_manager.save_state(run_id, &outcome.next, &cancel).await {
                tracing::warn!(run_id, turn, error = %e, "state save failed");
            }
            state = outcome.next;
            if let Some((success, reason)) = outcome.stop {
                break (outcome.phase, success, reason);
            }
        };

        if let Err(e) = self.state_manager.clear_state(run_id).await {
            tracing::warn!(run_id, error = %e, "state clear failed");
        }
        let duration = start.elapsed();
        tracing::info!(
            run_id,
            success,
            turns = state.turn_index,
            duration_ms = duration.as_millis() as u64,
            reason = %stop_reason,
            "run finished"
        );
        AgentResult {
            run_id: run_id.to_string(),
            success,
            phase,
            total_turns: state.turn_index,
            final_state: state,
            stop_reason,
            duration,
        }
    }

    async fn turn(
        &self,
        run_id: &str,
        state: &AgentState,
        policy: &ErrorHandlingPolicy,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        let decision = self.planner.decide(state, cancel).await?;
        let action =
            self.policy_engine
                .resolve(&decision, state.last_observation.as_ref(), policy, state);
        tracing::debug!(run_id, turn = state.turn_index + 1, action = %action.describe(), "resolved action");

        match &action {
            Action::CallTool {
                call,
                attempt,
                wait,
            } => {
                wait_before_call(*wait, cancel).await?;
                let mut result = self.executor.execute(call, *attempt, cancel).await;
                if self.repair_output && result.error_code == ToolErrorCode::OutputSchemaMismatch {
                    if let Some(fixed) = self.executor.repair(&result) {
                        result = fixed;
                    }
                }
                let observation = self.normalizer.normalize(&call.name, &result.data, &result);
                self.events.emit(AgentEvent::ToolCalled {
                    run_id: run_id.to_string(),
                    tool: call.name.clone(),
                    summary: observation.summary.clone(),
                });

                let critique = match &self.critic {
                    Some(critic) => Some(critic.assess(&state.goal, &observation, cancel).await),
                    None => None,
                };
                // Critic 判定目标已满足时本回合即终止，不再继续循环
                let stop = critique
                    .as_ref()
                    .filter(|c| c.goal_satisfied)
                    .map(|c| (true, format!("Goal achieved: {}", c.assessment)));
                let next = self
                    .state_manager
                    .update_state(state, &action, Some(observation), critique);
                Ok(match stop {
                    Some(stop) => TurnOutcome {
                        next,
                        phase: RunPhase::Stopped,
                        stop: Some(stop),
                    },
                    None => TurnOutcome::running(next),
                })
            }
            Action::AskUser {
                question,
                missing_fields,
            } => {
                self.events.emit(AgentEvent::UserInputRequested {
                    run_id: run_id.to_string(),
                    question: question.clone(),
                    missing_fields: missing_fields.clone(),
                });
                Ok(TurnOutcome {
                    next: self.state_manager.update_state(state, &action, None, None),
                    phase: RunPhase::AwaitingUser,
                    stop: Some((false, STOP_USER_INPUT.to_string())),
                })
            }
            Action::Stop { reason } => Ok(TurnOutcome {
                next: self.state_manager.update_state(state, &action, None, None),
                phase: RunPhase::Stopped,
                stop: Some((is_goal_achieved(reason), reason.clone())),
            }),
            Action::Replan { .. } => Ok(TurnOutcome::running(
                self.state_manager.update_state(state, &action, None, None),
            )),
        }
    }
}

/// 退避等待；取消时立即放弃
async fn wait_before_call(wait: Duration, cancel: &CancellationToken) -> Result<(), AgentError> {
    if wait.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        _ = tokio::time::sleep(wait) => Ok(()),
    }
}
