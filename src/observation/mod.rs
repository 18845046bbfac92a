//! 观察层：把原始工具结果压缩为有界的 Observation（摘要 / 关键事实 / 可选后续动作）

pub mod limiter;
pub mod normalizer;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tools::ToolResult;

pub use limiter::{CharLimiter, Limited, OutputLimiter};
pub use normalizer::{NormalizerLimits, ObservationNormalizer, TRUNCATION_MARK};

/// 工具结果的规范化视图
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub tool: String,
    /// 一句话摘要（有长度上限）
    pub summary: String,
    /// 扁平化的关键事实（条数与单值长度均有上限）
    pub facts: BTreeMap<String, String>,
    /// 建议的后续动作，如 next_page / retry_with_param_x / fallback_tool_y
    pub affordances: Vec<String>,
    /// 原始结果
    pub result: ToolResult,
}

impl Observation {
    pub fn succeeded(&self) -> bool {
        self.result.ok
    }

    /// 构建供 Planner 使用的 Prompt 片段
    pub fn to_prompt_section(&self) -> String {
        let mut s = format!("## Last observation ({})\n{}\n", self.tool, self.summary);
        if !self.facts.is_empty() {
            s.push_str("Key facts:\n");
            for (k, v) in &self.facts {
                s.push_str(&format!("- {} = {}\n", k, v));
            }
        }
        if !self.affordances.is_empty() {
            s.push_str(&format!("Suggested next actions: {}\n", self.affordances.join(", ")));
        }
        s.push('\n');
        s
    }
}
