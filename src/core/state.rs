//! 运行状态：Goal、Budget、AgentState 与运行阶段
//!
//! AgentState 是回合边界上的不可变快照；每回合由 StateManager 构造新值，从不原地修改。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::decision::{Action, Critique};
use crate::memory::WorkingMemory;
use crate::observation::Observation;

/// 本次运行要达成的目标；运行开始后不再修改
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub text: String,
    pub constraints: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Goal {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            constraints: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }
}

/// 运行的资源上限：回合数 + 墙钟时长
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub max_turns: u32,
    pub max_duration: Duration,
}

impl Budget {
    pub fn new(max_turns: u32, max_duration: Duration) -> Self {
        Self {
            max_turns,
            max_duration,
        }
    }

    /// 纯函数且单调：turn_index 或 elapsed 变大后不会从 true 变回 false
    pub fn exhausted(&self, turn_index: u32, elapsed: Duration) -> bool {
        turn_index >= self.max_turns || elapsed >= self.max_duration
    }

    pub fn remaining_turns(&self, turn_index: u32) -> u32 {
        self.max_turns.saturating_sub(turn_index)
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::new(20, Duration::from_secs(300))
    }
}

/// 回合边界上的运行快照
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub goal: Goal,
    pub subgoals: Vec<String>,
    pub last_action: Option<Action>,
    pub last_observation: Option<Observation>,
    pub last_critique: Option<Critique>,
    pub budget: Budget,
    /// 已完成的回合数；每完成一回合恰好加 1
    pub turn_index: u32,
    pub digest: WorkingMemory,
}

/// 运行状态机：Running -> {Running, AwaitingUser, Stopped}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    Running,
    AwaitingUser,
    Stopped,
}

/// 一次运行的终局结果，每次运行恰好产生一个
#[derive(Clone, Debug)]
pub struct AgentResult {
    pub run_id: String,
    pub success: bool,
    /// 退出时的阶段：AwaitingUser 表示需要用户补充信息后以新运行继续
    pub phase: RunPhase,
    pub final_state: AgentState,
    pub stop_reason: String,
    pub total_turns: u32,
    pub duration: Duration,
}
