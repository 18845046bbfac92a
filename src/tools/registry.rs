//! 工具注册表
//!
//! 所有工具实现 Tool trait（名称 / 描述 / 参数声明 / 输出 schema / 超时 / 重试 / 备用工具 / 执行），
//! 由 ToolRegistry 按名注册与查找；只有启用的条目会出现在 Planner 的工具目录中。
//! ToolExecutor 在调用时做输入校验、超时与错误分类。

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::RetryPolicy;

/// 参数类型（与 JSON Schema 的 type 对应）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// 单个参数声明
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub allowed_values: Option<Vec<Value>>,
    #[serde(default)]
    pub default: Option<Value>,
    /// 数组元素类型（kind = array 时有效）
    #[serde(default)]
    pub item_type: Option<ParamType>,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: String::new(),
            allowed_values: None,
            default: None,
            item_type: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = Some(values);
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn items(mut self, item_type: ParamType) -> Self {
        self.item_type = Some(item_type);
        self
    }

    /// 工具目录中的一行描述，如 `operation (string, optional, one of ["now"], default "now")`
    pub fn catalog_line(&self) -> String {
        let mut kind = self.kind.as_str().to_string();
        if let (ParamType::Array, Some(item)) = (self.kind, self.item_type) {
            kind = format!("array<{}>", item.as_str());
        }
        let mut parts = vec![
            kind,
            if self.required { "required" } else { "optional" }.to_string(),
        ];
        if let Some(values) = &self.allowed_values {
            parts.push(format!("one of {}", Value::Array(values.clone())));
        }
        if let Some(default) = &self.default {
            parts.push(format!("default {}", default));
        }
        let mut line = format!("{} ({})", self.name, parts.join(", "));
        if !self.description.is_empty() {
            line.push_str(&format!(": {}", self.description));
        }
        line
    }
}

/// 每次调用传给工具的上下文
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub attempt: u32,
    /// 由运行级取消令牌派生；超时或运行取消时触发
    pub cancel: CancellationToken,
}

/// 工具实现报告的失败；由 ToolExecutor 按固定表映射为 ToolErrorCode
#[derive(Clone, Debug, PartialEq)]
pub enum ToolFailure {
    /// 可重试的服务端错误；rate_limited 时附带 retry_after
    Retryable {
        message: String,
        rate_limited: bool,
        retry_after: Option<Duration>,
    },
    Unauthorized(String),
    Forbidden(String),
    NoResults(String),
    /// 其它任何失败，归为 ToolBug
    Failed(String),
}

impl ToolFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        ToolFailure::Retryable {
            message: message.into(),
            rate_limited: false,
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        ToolFailure::Retryable {
            message: message.into(),
            rate_limited: true,
            retry_after,
        }
    }
}

/// 工具 trait：名称、描述、参数声明（供 LLM 与输入校验）、可选输出 schema、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具 id（Decision 中的 name 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数声明；默认无参数
    fn parameters(&self) -> Vec<ParameterSpec> {
        Vec::new()
    }

    /// 输出 JSON Schema；None 表示不校验输出
    fn output_schema(&self) -> Option<Value> {
        None
    }

    /// 单次调用超时；None 时使用执行器默认值
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// 自身的重试形状；None 时使用运行级策略
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    /// 重试耗尽后的备用工具
    fn fallback(&self) -> Option<&str> {
        None
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolFailure>;
}

struct Entry {
    tool: Arc<dyn Tool>,
    enabled: bool,
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，BTreeMap 保证目录顺序稳定
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, Entry { tool, enabled: true });
    }

    /// 启用 / 禁用；返回该工具是否存在
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.tools.get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// 查找已启用的工具；禁用的工具对执行器不可见
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .filter(|e| e.enabled)
            .map(|e| e.tool.clone())
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.enabled().map(|t| t.name().to_string()).collect()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values().filter(|e| e.enabled).map(|e| &e.tool)
    }

    /// 工具 -> 备用工具 映射
    pub fn fallbacks(&self) -> HashMap<String, String> {
        self.enabled()
            .filter_map(|t| t.fallback().map(|f| (t.name().to_string(), f.to_string())))
            .collect()
    }

    /// 生成 prompt 中的 Available tools 段落
    pub fn catalog_section(&self) -> String {
        let mut s = String::from("## Available tools\n");
        for tool in self.enabled() {
            s.push_str(&format!("- {}: {}\n", tool.name(), tool.description()));
            for p in tool.parameters() {
                s.push_str(&format!("  - {}\n", p.catalog_line()));
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;
    use serde_json::json;

    #[test]
    fn test_disabled_tool_hidden() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        assert!(registry.get("echo").is_some());
        assert!(registry.set_enabled("echo", false));
        assert!(registry.get("echo").is_none());
        assert!(registry.tool_names().is_empty());
        assert!(!registry.catalog_section().contains("echo"));
        assert!(!registry.set_enabled("missing", true));
    }

    #[test]
    fn test_catalog_line_lists_constraints() {
        let p = ParameterSpec::optional("operation", ParamType::String)
            .one_of(vec![json!("now"), json!("today")])
            .default_value(json!("now"));
        assert_eq!(
            p.catalog_line(),
            r#"operation (string, optional, one of ["now","today"], default "now")"#
        );
        let tags = ParameterSpec::required("tags", ParamType::Array).items(ParamType::String);
        assert_eq!(tags.catalog_line(), "tags (array<string>, required)");
    }

    #[test]
    fn test_catalog_section_includes_parameters() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let section = registry.catalog_section();
        assert!(section.contains("- echo:"));
        assert!(section.contains("text (string, required)"));
    }
}
