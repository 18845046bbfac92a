//! LLM 客户端抽象
//!
//! 模型后端只需实现 LlmClient::complete：给定 system + user + 采样参数，返回一段文本。
//! 具体的传输（OpenAI 兼容 / DeepSeek 等）不在本 crate 内。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request timeout")]
    Timeout,
}

/// 采样参数
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

/// 一次结构化提示：system 文本 + user 文本 + 采样参数
#[derive(Clone, Debug, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub sampling: SamplingConfig,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>, sampling: SamplingConfig) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            sampling,
        }
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError>;
}
