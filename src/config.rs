//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__POLICY__MAX_RETRIES=3`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{Budget, ErrorHandlingPolicy};
use crate::llm::SamplingConfig;
use crate::memory::DigestLimits;
use crate::observation::NormalizerLimits;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub policy: PolicySection,
    pub tools: ToolsSection,
    pub planner: PlannerSection,
    pub critic: CriticSection,
    pub observation: ObservationSection,
    pub memory: MemorySection,
    pub store: StoreSection,
}

/// [agent] 段：运行预算与基础 system prompt
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_turns: u32,
    pub max_duration_secs: u64,
    /// 覆盖默认的 Planner system prompt
    pub system_prompt: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_duration_secs: 300,
            system_prompt: None,
        }
    }
}

/// [policy] 段：重试 / 备用工具 / 缺参提问
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub use_fallbacks: bool,
    pub ask_user_when_missing_fields: bool,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 500,
            use_fallbacks: true,
            ask_user_when_missing_fields: true,
        }
    }
}

/// [tools] 段：默认超时、工作目录、输出修复开关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒），工具未声明自身超时时使用
    pub default_timeout_secs: u64,
    pub working_dir: Option<PathBuf>,
    /// OutputSchemaMismatch 时尝试有界修复
    pub repair_output: bool,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            working_dir: None,
            repair_output: true,
        }
    }
}

/// [planner] 段：采样参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

impl PlannerSection {
    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// [critic] 段：启用开关、评估范围、prompt 模板
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CriticSection {
    pub enabled: bool,
    pub evaluate_all_tools: bool,
    /// evaluate_all_tools = false 时仅评估这些工具
    pub evaluate_tools: Vec<String>,
    /// 可用占位符：{goal} {tool} {observation}
    pub prompt_template: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CriticSection {
    fn default() -> Self {
        Self {
            enabled: true,
            evaluate_all_tools: true,
            evaluate_tools: Vec::new(),
            prompt_template: crate::react::critic::DEFAULT_CRITIC_TEMPLATE.to_string(),
            max_tokens: 256,
            temperature: 0.0,
        }
    }
}

impl CriticSection {
    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// [observation] 段：摘要与关键事实上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservationSection {
    pub summary_max_chars: usize,
    pub max_facts: usize,
    pub fact_max_chars: usize,
}

impl Default for ObservationSection {
    fn default() -> Self {
        let limits = NormalizerLimits::default();
        Self {
            summary_max_chars: limits.summary_max_chars,
            max_facts: limits.max_facts,
            fact_max_chars: limits.fact_max_chars,
        }
    }
}

/// [memory] 段：工作记忆容量
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub digest_max_entries: usize,
    pub decision_log_max: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        let limits = DigestLimits::default();
        Self {
            digest_max_entries: limits.max_entries,
            decision_log_max: limits.max_log,
        }
    }
}

/// 状态存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

/// [store] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub kind: StoreKind,
    /// kind = file 时的目录
    pub dir: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            dir: PathBuf::from("./state"),
        }
    }
}

impl AppConfig {
    pub fn budget(&self) -> Budget {
        Budget::new(
            self.agent.max_turns,
            Duration::from_secs(self.agent.max_duration_secs),
        )
    }

    pub fn error_policy(&self) -> ErrorHandlingPolicy {
        ErrorHandlingPolicy {
            max_retries: self.policy.max_retries,
            base_backoff: Duration::from_millis(self.policy.base_backoff_ms),
            use_fallbacks: self.policy.use_fallbacks,
            ask_user_when_missing_fields: self.policy.ask_user_when_missing_fields,
        }
    }

    pub fn normalizer_limits(&self) -> NormalizerLimits {
        NormalizerLimits {
            summary_max_chars: self.observation.summary_max_chars,
            max_facts: self.observation.max_facts,
            fact_max_chars: self.observation.fact_max_chars,
        }
    }

    pub fn digest_limits(&self) -> DigestLimits {
        DigestLimits {
            max_entries: self.memory.digest_max_entries,
            max_log: self.memory.decision_log_max,
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
