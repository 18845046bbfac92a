//! Observation 规范化
//!
//! 摘要取一句话，关键事实为结构化输出的扁平叶子值，affordance 依据结果形状给出（分页标记、部分成功、
//! 可重试错误、缺失参数、备用工具）。截断总是显式的：被截断的值末尾追加 TRUNCATION_MARK。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

use crate::core::ToolErrorCode;
use crate::observation::{CharLimiter, Observation, OutputLimiter};
use crate::tools::ToolResult;

/// 截断标记
pub const TRUNCATION_MARK: &str = "…[truncated]";
/// 事实被省略时使用的键
const OMITTED_KEY: &str = "_omitted";
/// 视为「还有下一页」的字段
const PAGINATION_KEYS: &[&str] = &["next_page", "next_cursor", "next_page_token", "next"];

/// 规范化上限
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NormalizerLimits {
    pub summary_max_chars: usize,
    pub max_facts: usize,
    pub fact_max_chars: usize,
}

impl Default for NormalizerLimits {
    fn default() -> Self {
        Self {
            summary_max_chars: 200,
            max_facts: 16,
            fact_max_chars: 120,
        }
    }
}

pub struct ObservationNormalizer {
    limits: NormalizerLimits,
    limiter: Arc<dyn OutputLimiter>,
    /// 工具 -> 备用工具
    fallbacks: HashMap<String, String>,
}

impl Default for ObservationNormalizer {
    fn default() -> Self {
        Self::new(NormalizerLimits::default())
    }
}

impl ObservationNormalizer {
    pub fn new(limits: NormalizerLimits) -> Self {
        Self {
            limits,
            limiter: Arc::new(CharLimiter),
            fallbacks: HashMap::new(),
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn OutputLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: HashMap<String, String>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn normalize(&self, tool: &str, raw: &Value, result: &ToolResult) -> Observation {
        Observation {
            tool: tool.to_string(),
            summary: self.cap(&summarize(tool, raw, result), self.limits.summary_max_chars),
            facts: self.key_facts(raw, result),
            affordances: self.affordances(tool, raw, result),
            result: result.clone(),
        }
    }

    fn cap(&self, text: &str, max_chars: usize) -> String {
        let limited = self.limiter.limit(text, max_chars);
        if limited.truncated {
            format!("{}{}", limited.text, TRUNCATION_MARK)
        } else {
            limited.text
        }
    }

    fn key_facts(&self, raw: &Value, result: &ToolResult) -> BTreeMap<String, String> {
        let mut leaves = Vec::new();
        if result.ok || !raw.is_null() {
            flatten("", raw, &mut leaves);
        }
        if !result.ok {
            leaves.push(("error_code".to_string(), result.error_code.to_string()));
            if let Some(detail) = &result.error_detail {
                leaves.push(("error_detail".to_string(), detail.clone()));
            }
            if !result.missing_fields.is_empty() {
                leaves.push(("missing_fields".to_string(), result.missing_fields.join(", ")));
            }
        }

        let max_facts = self.limits.max_facts.max(1);
        let total = leaves.len();
        let mut facts = BTreeMap::new();
        let keep = if total > max_facts { max_facts - 1 } else { total };
        for (key, value) in leaves.into_iter().take(keep) {
            facts.insert(key, self.cap(&value, self.limits.fact_max_chars));
        }
        if total > keep {
            facts.insert(
                OMITTED_KEY.to_string(),
                format!("{} more fact(s) omitted", total - keep),
            );
        }
        facts
    }

    fn affordances(&self, tool: &str, raw: &Value, result: &ToolResult) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |a: String| {
            if !out.contains(&a) {
                out.push(a);
            }
        };

        if result.ok {
            if has_next_page(raw) {
                push("next_page".to_string());
            }
            if is_partial(raw) {
                push("retry_failed_items".to_string());
            }
            return out;
        }

        if result.error_code.is_transient() {
            push("retry".to_string());
        }
        for field in &result.missing_fields {
            push(format!("retry_with_param_{field}"));
        }
        if result.error_code == ToolErrorCode::NoResults {
            push("broaden_query".to_string());
        }
        if let Some(fallback) = self.fallbacks.get(tool) {
            push(format!("fallback_tool_{fallback}"));
        }
        out
    }
}

fn first_sentence(text: &str) -> &str {
    let text = text.trim();
    let line = text.lines().next().unwrap_or("");
    match line.find(". ") {
        Some(idx) => &line[..=idx],
        None => line,
    }
}

fn summarize(tool: &str, raw: &Value, result: &ToolResult) -> String {
    if !result.ok {
        let detail = result.error_detail.as_deref().map(first_sentence).unwrap_or("");
        return if detail.is_empty() {
            format!("{} failed ({}).", tool, result.error_code)
        } else {
            format!("{} failed ({}): {}", tool, result.error_code, detail)
        };
    }
    let mut s = match raw {
        Value::Null => format!("{tool} succeeded with no output."),
        Value::String(text) => format!("{}: {}", tool, first_sentence(text)),
        Value::Array(items) => format!("{} returned {} item(s).", tool, items.len()),
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().take(4).map(String::as_str).collect();
            let more = if map.len() > keys.len() { ", ..." } else { "" };
            format!("{} succeeded with fields: {}{}.", tool, keys.join(", "), more)
        }
        other => format!("{tool}: {other}"),
    };
    if result.repaired {
        s.push_str(" (output repaired)");
    }
    s
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    let key = |suffix: &str| {
        if prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{prefix}.{suffix}")
        }
    };
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                flatten(&key(k), v, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, v) in items.iter().enumerate() {
                let p = if prefix.is_empty() {
                    format!("[{i}]")
                } else {
                    format!("{prefix}[{i}]")
                };
                flatten(&p, v, out);
            }
        }
        Value::String(s) => out.push((key_or_value(prefix), s.clone())),
        other => out.push((key_or_value(prefix), other.to_string())),
    }
}

fn key_or_value(prefix: &str) -> String {
    if prefix.is_empty() {
        "value".to_string()
    } else {
        prefix.to_string()
    }
}

fn has_next_page(raw: &Value) -> bool {
    let Some(map) = raw.as_object() else {
        return false;
    };
    if map.get("has_more").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    PAGINATION_KEYS.iter().any(|k| match map.get(*k) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    })
}

fn is_partial(raw: &Value) -> bool {
    let Some(map) = raw.as_object() else {
        return false;
    };
    if map.get("partial").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    ["errors", "failed"].iter().any(|k| {
        map.get(*k)
            .and_then(Value::as_array)
            .is_some_and(|a| !a.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolCall;
    use serde_json::json;
    use std::time::Duration;

    fn ok_result(data: Value) -> ToolResult {
        ToolResult {
            call: ToolCall::new("search", json!({})),
            ok: true,
            data,
            error_code: ToolErrorCode::None,
            error_detail: None,
            schema_validated: true,
            attempt: 1,
            latency: Duration::from_millis(5),
            missing_fields: Vec::new(),
            retry_after: None,
            repaired: false,
        }
    }

    fn failed_result(code: ToolErrorCode, detail: &str) -> ToolResult {
        ToolResult {
            ok: false,
            data: Value::Null,
            error_code: code,
            error_detail: Some(detail.to_string()),
            schema_validated: false,
            ..ok_result(Value::Null)
        }
    }

    #[test]
    fn test_flattens_nested_leaves() {
        let raw = json!({"user": {"name": "ann", "tags": ["a", "b"]}, "count": 2});
        let obs = ObservationNormalizer::default().normalize("search", &raw, &ok_result(raw.clone()));
        assert_eq!(obs.facts.get("user.name").map(String::as_str), Some("ann"));
        assert_eq!(obs.facts.get("user.tags[1]").map(String::as_str), Some("b"));
        assert_eq!(obs.facts.get("count").map(String::as_str), Some("2"));
        assert!(obs.summary.starts_with("search succeeded with fields"));
    }

    #[test]
    fn test_fact_count_cap_is_explicit() {
        let raw = json!({"a": 1, "b": 2, "c": 3, "d": 4, "e": 5});
        let limits = NormalizerLimits {
            max_facts: 3,
            ..NormalizerLimits::default()
        };
        let obs = ObservationNormalizer::new(limits).normalize("t", &raw, &ok_result(raw.clone()));
        assert_eq!(obs.facts.len(), 3);
        assert_eq!(
            obs.facts.get(OMITTED_KEY).map(String::as_str),
            Some("3 more fact(s) omitted")
        );
    }

    #[test]
    fn test_long_values_carry_truncation_mark() {
        let raw = json!({"body": "x".repeat(500)});
        let limits = NormalizerLimits {
            fact_max_chars: 10,
            ..NormalizerLimits::default()
        };
        let obs = ObservationNormalizer::new(limits).normalize("t", &raw, &ok_result(raw.clone()));
        let body = obs.facts.get("body").unwrap();
        assert!(body.ends_with(TRUNCATION_MARK));
        assert!(body.starts_with("xxxxxxxxxx"));
    }

    #[test]
    fn test_summary_is_one_sentence() {
        let raw = json!("First sentence. Second sentence.\nThird line");
        let obs = ObservationNormalizer::default().normalize("reader", &raw, &ok_result(raw.clone()));
        assert_eq!(obs.summary, "reader: First sentence.");
        assert_eq!(obs.facts.get("value").map(String::as_str), Some("First sentence. Second sentence.\nThird line"));
    }

    #[test]
    fn test_pagination_affordance() {
        let raw = json!({"items": [1], "next_cursor": "abc"});
        let obs = ObservationNormalizer::default().normalize("list", &raw, &ok_result(raw.clone()));
        assert_eq!(obs.affordances, vec!["next_page".to_string()]);

        let raw = json!({"items": [1], "next_cursor": null, "has_more": false});
        let obs = ObservationNormalizer::default().normalize("list", &raw, &ok_result(raw.clone()));
        assert!(obs.affordances.is_empty());
    }

    #[test]
    fn test_partial_success_affordance() {
        let raw = json!({"done": [1, 2], "errors": ["item 3 failed"]});
        let obs = ObservationNormalizer::default().normalize("batch", &raw, &ok_result(raw.clone()));
        assert!(obs.affordances.contains(&"retry_failed_items".to_string()));
    }

    #[test]
    fn test_failure_affordances() {
        let mut fallbacks = HashMap::new();
        fallbacks.insert("search".to_string(), "web_search".to_string());
        let normalizer = ObservationNormalizer::default().with_fallbacks(fallbacks);

        let mut result = failed_result(ToolErrorCode::InvalidInput, "missing query");
        result.missing_fields = vec!["query".to_string()];
        let obs = normalizer.normalize("search", &Value::Null, &result);
        assert_eq!(
            obs.affordances,
            vec!["retry_with_param_query".to_string(), "fallback_tool_web_search".to_string()]
        );
        assert_eq!(obs.facts.get("error_code").map(String::as_str), Some("invalid_input"));
        assert_eq!(obs.summary, "search failed (invalid_input): missing query");

        let obs = normalizer.normalize("search", &Value::Null, &failed_result(ToolErrorCode::Timeout, ""));
        assert_eq!(obs.affordances[0], "retry");
    }

    #[test]
    fn test_long_summary_is_truncated_explicitly() {
        let raw = json!("y".repeat(1000));
        let obs = ObservationNormalizer::default().normalize("t", &raw, &ok_result(raw.clone()));
        assert!(obs.summary.ends_with(TRUNCATION_MARK));
        assert_eq!(obs.summary.chars().count(), 200 + TRUNCATION_MARK.chars().count());
    }
}
