//! 核心编排层：决策类型、错误分类、退避、运行状态、策略引擎、状态管理与 Agent 组装

pub mod backoff;
pub mod builder;
pub mod decision;
pub mod error;
pub mod policy;
pub mod state;
pub mod state_manager;

pub use backoff::{BackoffStrategy, RetryPolicy};
pub use builder::AgentBuilder;
pub use decision::{Action, Critique, Decision, Recommendation, ToolCall};
pub use error::{AgentError, ToolErrorCode};
pub use policy::{ErrorHandlingPolicy, PolicyEngine};
pub use state::{AgentResult, AgentState, Budget, Goal, RunPhase};
pub use state_manager::StateManager;
