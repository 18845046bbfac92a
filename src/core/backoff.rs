//! 单工具重试策略与退避计算
//!
//! 退避是确定性的：抖动由 (seed, attempt) 哈希得到，同样的输入总是得到同样的等待，
//! 这样策略引擎的输出可在测试中复现。

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 退避上限
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    None,
    Linear,
    #[default]
    Exponential,
    /// 指数退避 + 逐次去相关的抖动
    ExponentialJitter,
}

/// 单工具重试形状
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub strategy: BackoffStrategy,
    /// 取值 [0, 1]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            strategy: BackoffStrategy::Exponential,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration, strategy: BackoffStrategy) -> Self {
        Self {
            max_retries,
            base_backoff,
            strategy,
            jitter_factor: 0.0,
        }
    }

    /// 设置抖动系数（截断到 [0, 1]）
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = if jitter_factor.is_nan() {
            0.0
        } else {
            jitter_factor.clamp(0.0, 1.0)
        };
        self
    }

    /// 第 retry 次重试（从 1 开始）前的等待
    pub fn delay_for(&self, retry: u32, seed: &str) -> Duration {
        let retry = retry.max(1);
        let base = self.base_backoff.as_secs_f64();
        let raw = match self.strategy {
            BackoffStrategy::None => 0.0,
            BackoffStrategy::Linear => base * f64::from(retry),
            BackoffStrategy::Exponential => base * 2f64.powi(retry as i32 - 1),
            BackoffStrategy::ExponentialJitter => {
                let exp = base * 2f64.powi(retry as i32 - 1);
                let jitter = self.jitter_factor.clamp(0.0, 1.0);
                exp * (1.0 - jitter) + exp * jitter * unit_noise(seed, retry)
            }
        };
        Duration::from_secs_f64(raw.min(MAX_BACKOFF.as_secs_f64()).max(0.0))
    }
}

/// 由 seed 与 retry 派生的 [0, 1) 伪随机数（FNV-1a + splitmix64 混合）
fn unit_noise(seed: &str, retry: u32) -> f64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in seed.bytes().chain(retry.to_le_bytes()) {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h = h.wrapping_add(0x9e37_79b9_7f4a_7c15);
    h = (h ^ (h >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    h ^= h >> 31;
    (h >> 11) as f64 / (1u64 << 53) as f64
}
