//! 认知层：决策解析、Planner、Critic、生命周期事件与 Agent 主循环

pub mod critic;
pub mod events;
pub mod loop_;
pub mod parser;
pub mod planner;

pub use critic::{parse_critique, Critic, DEFAULT_CRITIC_TEMPLATE};
pub use events::{AgentEvent, EventBus, EventSink, TracingSink};
pub use loop_::{is_goal_achieved, Agent, STOP_BUDGET, STOP_CANCELLED, STOP_USER_INPUT};
pub use parser::{canonical_tool_name, default_args_for, parse_decision};
pub use planner::{Planner, DEFAULT_SYSTEM_PROMPT};
