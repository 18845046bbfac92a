//! Agent 错误类型与工具错误分类
//!
//! AgentError 描述回合内的致命错误（解析失败、LLM 失败、取消等），在回合边界被转换为 Stopped；
//! ToolErrorCode 是工具契约层与策略引擎共享的封闭错误分类。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Decision parse error: {0}")]
    DecisionParse(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("State store error: {0}")]
    StateStore(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Turn panicked: {0}")]
    Panicked(String),

    #[error("Cancelled")]
    Cancelled,
}

/// 工具调用失败的封闭分类；`None` 仅用于成功结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorCode {
    #[default]
    None,
    InvalidInput,
    Timeout,
    RetryableServer,
    RateLimited,
    OutputSchemaMismatch,
    NoResults,
    ToolBug,
    Unauthorized,
    Forbidden,
    NotFound,
}

impl ToolErrorCode {
    /// 瞬时错误：按退避策略重试
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ToolErrorCode::Timeout | ToolErrorCode::RetryableServer | ToolErrorCode::RateLimited
        )
    }

    /// 校验类错误：永不重试
    pub fn is_validation(self) -> bool {
        matches!(self, ToolErrorCode::InvalidInput | ToolErrorCode::NotFound)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorCode::None => "none",
            ToolErrorCode::InvalidInput => "invalid_input",
            ToolErrorCode::Timeout => "timeout",
            ToolErrorCode::RetryableServer => "retryable_server",
            ToolErrorCode::RateLimited => "rate_limited",
            ToolErrorCode::OutputSchemaMismatch => "output_schema_mismatch",
            ToolErrorCode::NoResults => "no_results",
            ToolErrorCode::ToolBug => "tool_bug",
            ToolErrorCode::Unauthorized => "unauthorized",
            ToolErrorCode::Forbidden => "forbidden",
            ToolErrorCode::NotFound => "not_found",
        }
    }
}

impl fmt::Display for ToolErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classes() {
        assert!(ToolErrorCode::Timeout.is_transient());
        assert!(ToolErrorCode::RetryableServer.is_transient());
        assert!(ToolErrorCode::RateLimited.is_transient());
        assert!(!ToolErrorCode::ToolBug.is_transient());
        assert!(!ToolErrorCode::InvalidInput.is_transient());
    }

    #[test]
    fn test_error_code_serializes_snake_case() {
        let json = serde_json::to_string(&ToolErrorCode::OutputSchemaMismatch).unwrap();
        assert_eq!(json, "\"output_schema_mismatch\"");
        assert_eq!(ToolErrorCode::default(), ToolErrorCode::None);
    }

    #[test]
    fn test_cancelled_display() {
        assert_eq!(AgentError::Cancelled.to_string(), "Cancelled");
    }
}
