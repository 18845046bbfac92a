//! 状态管理器：AgentState 的所有转换与持久化
//!
//! update_state 总是返回新值，从不修改传入的状态；持久化委托给外部 StateStore。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::decision::{Action, Critique};
use crate::core::error::AgentError;
use crate::core::state::{AgentState, Budget, Goal};
use crate::memory::{DigestLimits, StateStore, WorkingMemory};
use crate::observation::Observation;

#[derive(Clone, Default)]
pub struct StateManager {
    limits: DigestLimits,
    store: Option<Arc<dyn StateStore>>,
}

impl StateManager {
    pub fn new(limits: DigestLimits) -> Self {
        Self {
            limits,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// 回合 0，子目标与工作记忆为空
    pub fn create_initial_state(&self, goal: Goal, budget: Budget) -> AgentState {
        AgentState {
            goal,
            subgoals: Vec::new(),
            last_action: None,
            last_observation: None,
            last_critique: None,
            budget,
            turn_index: 0,
            digest: WorkingMemory::new(),
        }
    }

    /// 产生下一回合的状态：turn_index + 1，替换 last_*，Replan 时更新子目标，折叠关键事实
    pub fn update_state(
        &self,
        state: &AgentState,
        action: &Action,
        observation: Option<Observation>,
        critique: Option<Critique>,
    ) -> AgentState {
        let turn = state.turn_index + 1;
        let mut digest = state.digest.clone();
        digest.log(format!("turn {}: {}", turn, action.describe()), self.limits);

        let subgoals = match action {
            Action::Replan { subgoals } => {
                digest.log(
                    format!("replanned: {}", subgoals.join("; ")),
                    self.limits,
                );
                subgoals.clone()
            }
            _ => state.subgoals.clone(),
        };

        if let Some(obs) = &observation {
            let facts = obs
                .facts
                .iter()
                .map(|(k, v)| (format!("{}.{}", obs.tool, k), v.clone()));
            digest.fold(facts, turn, self.limits);
        }

        AgentState {
            goal: state.goal.clone(),
            subgoals,
            last_action: Some(action.clone()),
            last_observation: observation,
            last_critique: critique,
            budget: state.budget,
            turn_index: turn,
            digest,
        }
    }

    /// 未配置存储时为空操作
    pub async fn save_state(
        &self,
        run_id: &str,
        state: &AgentState,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            r = store.save(run_id, state) => r.map_err(|e| AgentError::StateStore(e.to_string())),
        }
    }

    pub async fn load_state(
        &self,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<AgentState>, AgentError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            r = store.load(run_id) => r.map_err(|e| AgentError::StateStore(e.to_string())),
        }
    }

    /// 清理不受取消影响：运行退出时无论原因都要清理
    pub async fn clear_state(&self, run_id: &str) -> Result<(), AgentError> {
        match &self.store {
            Some(store) => store
                .clear(run_id)
                .await
                .map_err(|e| AgentError::StateStore(e.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolCall;
    use crate::memory::InMemoryStateStore;
    use crate::observation::ObservationNormalizer;
    use crate::tools::ToolResult;
    use crate::core::ToolErrorCode;
    use serde_json::json;
    use std::time::Duration;

    fn initial() -> AgentState {
        StateManager::default()
            .create_initial_state(Goal::new("find weather"), Budget::new(5, Duration::from_secs(30)))
    }

    fn observation() -> Observation {
        let call = ToolCall::new("weather", json!({"city": "Oslo"}));
        let data = json!({"temp": 3, "sky": "snow"});
        let result = ToolResult {
            call,
            ok: true,
            data: data.clone(),
            error_code: ToolErrorCode::None,
            error_detail: None,
            schema_validated: true,
            attempt: 1,
            latency: Duration::from_millis(5),
            missing_fields: Vec::new(),
            retry_after: None,
            repaired: false,
        };
        ObservationNormalizer::default().normalize("weather", &data, &result)
    }

    #[test]
    fn test_initial_state_is_empty() {
        let s = initial();
        assert_eq!(s.turn_index, 0);
        assert!(s.subgoals.is_empty());
        assert!(s.digest.is_empty());
        assert!(s.last_action.is_none());
    }

    #[test]
    fn test_update_never_mutates_input() {
        let manager = StateManager::default();
        let before = initial();
        let snapshot = before.clone();
        let action = Action::call(ToolCall::new("weather", json!({"city": "Oslo"})));
        let after = manager.update_state(&before, &action, Some(observation()), None);

        assert!(!std::ptr::eq(&before, &after));
        assert_eq!(before, snapshot);
        assert_eq!(after.turn_index, before.turn_index + 1);
        assert_eq!(after.last_action, Some(action));
        assert_eq!(after.digest.get("weather.temp"), Some("3"));
    }

    #[test]
    fn test_replan_replaces_subgoals() {
        let manager = StateManager::default();
        let action = Action::Replan {
            subgoals: vec!["look up city".to_string(), "fetch forecast".to_string()],
        };
        let next = manager.update_state(&initial(), &action, None, None);
        assert_eq!(next.subgoals.len(), 2);
        assert!(next.last_observation.is_none());
        assert!(next
            .digest
            .decision_log()
            .iter()
            .any(|b| b.starts_with("replanned:")));
    }

    #[test]
    fn test_observation_is_replaced_not_kept() {
        let manager = StateManager::default();
        let call = Action::call(ToolCall::new("weather", json!({})));
        let s1 = manager.update_state(&initial(), &call, Some(observation()), None);
        let s2 = manager.update_state(&s1, &Action::Stop { reason: "x".into() }, None, None);
        assert!(s1.last_observation.is_some());
        assert!(s2.last_observation.is_none());
        // 事实仍留在摘要中
        assert_eq!(s2.digest.get("weather.sky"), Some("snow"));
    }

    #[test]
    fn test_digest_stays_bounded() {
        let manager = StateManager::new(DigestLimits {
            max_entries: 1,
            max_log: 4,
        });
        let call = Action::call(ToolCall::new("weather", json!({})));
        let next = manager.update_state(&initial(), &call, Some(observation()), None);
        assert_eq!(next.digest.len(), 1);
        assert!(next
            .digest
            .decision_log()
            .iter()
            .any(|b| b.contains("compressed")));
    }

    #[tokio::test]
    async fn test_save_load_clear_via_store() {
        let store = Arc::new(InMemoryStateStore::new());
        let manager = StateManager::default().with_store(store.clone());
        let token = CancellationToken::new();
        let s = initial();
        manager.save_state("r1", &s, &token).await.unwrap();
        assert_eq!(manager.load_state("r1", &token).await.unwrap(), Some(s));
        manager.clear_state("r1").await.unwrap();
        assert!(manager.load_state("r1", &token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_honors_cancellation() {
        let manager = StateManager::default().with_store(Arc::new(InMemoryStateStore::new()));
        let token = CancellationToken::new();
        token.cancel();
        let err = manager.save_state("r1", &initial(), &token).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[tokio::test]
    async fn test_without_store_is_noop() {
        let manager = StateManager::default();
        let token = CancellationToken::new();
        manager.save_state("r", &initial(), &token).await.unwrap();
        assert!(manager.load_state("r", &token).await.unwrap().is_none());
    }
}
