//! Agent 构建器：从 AppConfig 统一组装 Agent 的各个组件
//!
//! Planner、策略引擎与工具执行器共享同一个 ToolRegistry；Critic 可使用独立的 LLM。

use std::sync::Arc;

use crate::config::{AppConfig, StoreKind};
use crate::core::{PolicyEngine, StateManager};
use crate::llm::LlmClient;
use crate::memory::{FileStateStore, InMemoryStateStore, StateStore};
use crate::observation::ObservationNormalizer;
use crate::react::{Agent, Critic, EventBus, EventSink, Planner, TracingSink, DEFAULT_SYSTEM_PROMPT};
use crate::tools::{DateTimeTool, EchoTool, ToolExecutor, ToolRegistry};

/// Agent 构建器：统一配置和初始化 Agent 的各个组件
pub struct AgentBuilder {
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
    critic_llm: Option<Arc<dyn LlmClient>>,
    registry: Option<ToolRegistry>,
    store: Option<Arc<dyn StateStore>>,
    sinks: Vec<Arc<dyn EventSink>>,
    system_prompt: Option<String>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            config,
            llm,
            critic_llm: None,
            registry: None,
            store: None,
            sinks: Vec::new(),
            system_prompt: None,
        }
    }

    /// 使用自定义工具注册表；未设置时使用内置工具（echo / datetime_tool）
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Critic 使用与 Planner 不同的模型（避免自我认同）
    pub fn with_critic_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.critic_llm = Some(llm);
        self
    }

    /// 覆盖配置中的 [store]
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// 从 config/prompts/system.md 加载系统提示词（找不到时保持不变）
    pub fn with_system_prompt_from_file(mut self) -> Self {
        if let Some(prompt) = ["config/prompts/system.md", "../config/prompts/system.md"]
            .into_iter()
            .find_map(|p| std::fs::read_to_string(p).ok())
        {
            self.system_prompt = Some(prompt);
        }
        self
    }

    /// 内置工具注册表
    pub fn build_tool_registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        tools.register(DateTimeTool);
        tools
    }

    fn build_store(&self) -> Arc<dyn StateStore> {
        if let Some(store) = &self.store {
            return store.clone();
        }
        match self.config.store.kind {
            StoreKind::Memory => Arc::new(InMemoryStateStore::new()),
            StoreKind::File => Arc::new(FileStateStore::new(&self.config.store.dir)),
        }
    }

    fn build_critic(&self) -> Option<Critic> {
        if !self.config.critic.enabled {
            return None;
        }
        let llm = self.critic_llm.clone().unwrap_or_else(|| self.llm.clone());
        Some(Critic::from_config(llm, &self.config.critic))
    }

    pub fn build(mut self) -> Agent {
        let registry = Arc::new(
            self.registry
                .take()
                .unwrap_or_else(Self::build_tool_registry),
        );
        let cfg = &self.config;

        let system_prompt = self
            .system_prompt
            .clone()
            .or_else(|| cfg.agent.system_prompt.clone())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let planner = Planner::new(self.llm.clone(), registry.clone(), system_prompt)
            .with_sampling(cfg.planner.sampling());

        let mut executor = ToolExecutor::new(registry.clone(), cfg.tools.default_timeout_secs);
        if let Some(dir) = &cfg.tools.working_dir {
            executor = executor.with_working_dir(dir);
        }

        let normalizer = ObservationNormalizer::new(cfg.normalizer_limits())
            .with_fallbacks(registry.fallbacks());
        let state_manager = StateManager::new(cfg.digest_limits()).with_store(self.build_store());

        let mut events = EventBus::new();
        events.subscribe(Arc::new(TracingSink));
        for sink in &self.sinks {
            events.subscribe(sink.clone());
        }

        let mut agent = Agent::new(
            planner,
            PolicyEngine::new(registry),
            executor,
            normalizer,
            state_manager,
        )
        .with_events(events)
        .with_repair_output(cfg.tools.repair_output);
        if let Some(critic) = self.build_critic() {
            agent = agent.with_critic(critic);
        }
        agent
    }
}
