//! 决策类型：Planner 的 Decision、策略引擎解析后的 Action、Critic 的 Critique
//!
//! 纯数据，不含逻辑；每个变体互斥。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 一次工具调用请求：工具名 + 结构化参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// 同一调用：工具名与参数完全相同
    pub fn same_call(&self, other: &ToolCall) -> bool {
        self.name == other.name && self.args == other.args
    }
}

/// Planner 选择的下一步
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    CallTool(ToolCall),
    AskUser {
        question: String,
        missing_fields: Vec<String>,
    },
    Stop {
        reason: String,
    },
    Replan {
        subgoals: Vec<String>,
    },
}

impl Decision {
    pub fn stop(reason: impl Into<String>) -> Self {
        Decision::Stop {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Decision::CallTool(_) => "call_tool",
            Decision::AskUser { .. } => "ask_user",
            Decision::Stop { .. } => "stop",
            Decision::Replan { .. } => "replan",
        }
    }
}

/// 策略引擎解析后的可执行动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// attempt 从 1 开始；wait 为执行前的退避等待提示
    CallTool {
        call: ToolCall,
        attempt: u32,
        wait: Duration,
    },
    AskUser {
        question: String,
        missing_fields: Vec<String>,
    },
    Stop {
        reason: String,
    },
    Replan {
        subgoals: Vec<String>,
    },
}

impl Action {
    /// 首次调用（attempt = 1，无等待）
    pub fn call(call: ToolCall) -> Self {
        Action::CallTool {
            call,
            attempt: 1,
            wait: Duration::ZERO,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::CallTool { .. } => "call_tool",
            Action::AskUser { .. } => "ask_user",
            Action::Stop { .. } => "stop",
            Action::Replan { .. } => "replan",
        }
    }

    /// 决策日志用的一行描述
    pub fn describe(&self) -> String {
        match self {
            Action::CallTool { call, attempt, .. } if *attempt > 1 => {
                format!("call {} (attempt {})", call.name, attempt)
            }
            Action::CallTool { call, .. } => format!("call {}", call.name),
            Action::AskUser { question, .. } => format!("ask user: {question}"),
            Action::Stop { reason } => format!("stop: {reason}"),
            Action::Replan { subgoals } => format!("replan into {} subgoal(s)", subgoals.len()),
        }
    }
}

/// Critic 的建议（仅供参考）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    #[default]
    Continue,
    Replan,
    Clarify,
    Stop,
}

/// Critic 评估结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub assessment: String,
    pub goal_satisfied: bool,
    pub recommendation: Recommendation,
}

impl Critique {
    /// 中性评估：目标未满足，建议继续
    pub fn neutral(assessment: impl Into<String>) -> Self {
        Self {
            assessment: assessment.into(),
            goal_satisfied: false,
            recommendation: Recommendation::Continue,
        }
    }
}
