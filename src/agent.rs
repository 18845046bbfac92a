//! 无头运行入口
//!
//! 供嵌入方（HTTP 服务、批处理等）一行调用：加载配置、用内置工具组装 Agent、运行到结束。

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::load_config;
use crate::core::{AgentBuilder, AgentError, AgentResult, Goal};
use crate::llm::LlmClient;

/// 用配置（config_path + HIVE__* 环境变量）与内置工具运行一个目标
pub async fn run_goal(
    llm: Arc<dyn LlmClient>,
    goal: Goal,
    config_path: Option<PathBuf>,
    cancel: CancellationToken,
) -> Result<AgentResult, AgentError> {
    let cfg = load_config(config_path).map_err(|e| AgentError::Config(e.to_string()))?;
    let budget = cfg.budget();
    let policy = cfg.error_policy();
    let agent = AgentBuilder::new(cfg, llm).build();
    Ok(agent.run(goal, budget, &policy, cancel).await)
}
