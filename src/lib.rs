//! Hive - 工具型 LLM Agent 的编排运行时
//!
//! 模块划分：
//! - **agent**: 无头运行入口（加载配置并运行一个目标）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 决策类型、错误分类、退避、运行状态、策略引擎、状态管理、构建器
//! - **llm**: LLM 客户端抽象与 Mock
//! - **memory**: 工作记忆摘要与状态持久化
//! - **observation**: 工具结果规范化与输出限长
//! - **observability**: tracing 初始化
//! - **react**: 决策解析、Planner、Critic、生命周期事件、Agent 主循环
//! - **tools**: 工具契约（注册表、schema 校验、执行器）与内置工具

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod observation;
pub mod react;
pub mod tools;

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use crate::core::{AgentBuilder, AgentResult, Budget, ErrorHandlingPolicy, Goal};
pub use crate::react::Agent;
