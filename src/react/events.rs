//! 运行生命周期事件：供日志 / UI 订阅
//!
//! 发布是 fire-and-forget：订阅者的失败（通道关闭、panic）不会影响回合。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// 单个生命周期事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TurnStarted {
        run_id: String,
        turn: u32,
    },
    TurnCompleted {
        run_id: String,
        turn: u32,
        duration_ms: u64,
        action_type: String,
    },
    /// 工具返回（摘要，避免过长）
    ToolCalled {
        run_id: String,
        tool: String,
        summary: String,
    },
    UserInputRequested {
        run_id: String,
        question: String,
        missing_fields: Vec<String>,
    },
}

/// 事件订阅者
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &AgentEvent);
}

/// 通道订阅：接收端关闭后静默丢弃
impl EventSink for UnboundedSender<AgentEvent> {
    fn publish(&self, event: &AgentEvent) {
        let _ = self.send(event.clone());
    }
}

/// 把事件写成 debug 级结构化日志
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &AgentEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::debug!(event = %json, "agent event"),
            Err(e) => tracing::warn!(error = %e, "agent event could not be serialized"),
        }
    }
}

/// 多播：依次投递给所有订阅者，单个订阅者 panic 只记录日志
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn emit(&self, event: AgentEvent) {
        for sink in &self.sinks {
            if catch_unwind(AssertUnwindSafe(|| sink.publish(&event))).is_err() {
                tracing::warn!("event subscriber panicked; event dropped for that subscriber");
            }
        }
    }
}
