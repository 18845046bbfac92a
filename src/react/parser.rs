//! 决策解析：把模型的文本回复解析为唯一的 Decision
//!
//! 先剥离 Markdown 代码围栏，再严格按 JSON 解析（不做修复）。按顺序尝试一组形状匹配器：
//! 1. 规范形状：顶层 `action` 判别字段（call_tool | ask_user | replan | stop）
//! 2. 模型实际出现过的替代形状：`call_tool: {name, args}`、`stop: {reason}`、`ask_user: {question, missing_fields}`
//!
//! 都不匹配时报错，绝不静默地给出默认决策。

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::core::{AgentError, Decision, ToolCall};
use crate::tools::DATETIME_TOOL;

/// 人类可读工具名 -> 规范 id（键为小写）
const TOOL_ALIASES: &[(&str, &str)] = &[
    ("date time tool", DATETIME_TOOL),
    ("datetime tool", DATETIME_TOOL),
    ("date_time_tool", DATETIME_TOOL),
    ("date time", DATETIME_TOOL),
    ("datetime", DATETIME_TOOL),
];

/// 空参数时注入的默认参数：(工具, 参数名, 值)
const DEFAULT_ARGS: &[(&str, &str, &str)] = &[(DATETIME_TOOL, "operation", "now")];

type ShapeMatcher = fn(&Map<String, Value>) -> Option<Result<Decision, AgentError>>;

/// 有序的形状匹配器：返回 None 表示「不是这个形状」，Some(Err) 表示形状对但内容非法
const SHAPE_MATCHERS: &[(&str, ShapeMatcher)] = &[
    ("action", match_tagged),
    ("call_tool", match_call_tool_object),
    ("stop", match_stop_object),
    ("ask_user", match_ask_user_object),
];

/// 规范决策格式
#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum TaggedDecision {
    CallTool {
        name: String,
        #[serde(default)]
        args: Value,
    },
    AskUser {
        question: String,
        #[serde(default)]
        missing_fields: Vec<String>,
    },
    Replan {
        subgoals: Vec<String>,
    },
    Stop {
        reason: String,
    },
}

#[derive(Deserialize)]
struct CallToolShape {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
struct StopShape {
    reason: String,
}

#[derive(Deserialize)]
struct AskUserShape {
    question: String,
    #[serde(default)]
    missing_fields: Vec<String>,
}

fn fence_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\s*```$").ok())
        .as_ref()
}

/// 剥离包裹整个回复的 Markdown 代码围栏；没有围栏时原样返回（去首尾空白）
pub fn strip_code_fence(output: &str) -> &str {
    let trimmed = output.trim();
    match fence_regex()
        .and_then(|re| re.captures(trimmed))
        .and_then(|c| c.get(1))
    {
        Some(m) => m.as_str().trim(),
        None => trimmed,
    }
}

/// 工具名规范化：先查别名表，否则转小写、空格换下划线
pub fn canonical_tool_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    TOOL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, id)| id.to_string())
        .unwrap_or_else(|| lower.replace(' ', "_"))
}

/// 已知工具在空参数时的默认参数
pub fn default_args_for(tool: &str) -> Option<Value> {
    let mut args = Map::new();
    for (_, key, value) in DEFAULT_ARGS.iter().filter(|(t, _, _)| *t == tool) {
        args.insert(key.to_string(), json!(value));
    }
    (!args.is_empty()).then_some(Value::Object(args))
}

fn is_empty_args(args: &Value) -> bool {
    match args {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

fn normalize_args(args: Value) -> Value {
    if args.is_null() {
        Value::Object(Map::new())
    } else {
        args
    }
}

fn tool_call(name: String, args: Value) -> Result<Decision, AgentError> {
    if name.trim().is_empty() {
        return Err(AgentError::DecisionParse("call_tool with empty tool name".to_string()));
    }
    Ok(Decision::CallTool(ToolCall::new(name, normalize_args(args))))
}

fn shape<T: for<'de> Deserialize<'de>>(key: &str, value: &Value) -> Result<T, AgentError> {
    serde_json::from_value(value.clone())
        .map_err(|e| AgentError::DecisionParse(format!("malformed '{key}' object: {e}")))
}

fn match_tagged(obj: &Map<String, Value>) -> Option<Result<Decision, AgentError>> {
    obj.get("action")?;
    let parsed: TaggedDecision = match shape("action", &Value::Object(obj.clone())) {
        Ok(p) => p,
        Err(e) => return Some(Err(e)),
    };
    Some(match parsed {
        TaggedDecision::CallTool { name, args } => tool_call(name, args),
        TaggedDecision::AskUser {
            question,
            missing_fields,
        } => Ok(Decision::AskUser {
            question,
            missing_fields,
        }),
        TaggedDecision::Replan { subgoals } => Ok(Decision::Replan { subgoals }),
        TaggedDecision::Stop { reason } => Ok(Decision::Stop { reason }),
    })
}

fn match_call_tool_object(obj: &Map<String, Value>) -> Option<Result<Decision, AgentError>> {
    let value = obj.get("call_tool")?;
    Some(shape::<CallToolShape>("call_tool", value).and_then(|c| {
        let name = canonical_tool_name(&c.name);
        let args = if is_empty_args(&c.args) {
            default_args_for(&name).unwrap_or(c.args)
        } else {
            c.args
        };
        tool_call(name, args)
    }))
}

fn match_stop_object(obj: &Map<String, Value>) -> Option<Result<Decision, AgentError>> {
    let value = obj.get("stop")?;
    Some(shape::<StopShape>("stop", value).map(|s| Decision::Stop { reason: s.reason }))
}

/// missing_fields 为空说明模型其实已经给出了答复：视为会话式完成（Stop），而非澄清请求
fn match_ask_user_object(obj: &Map<String, Value>) -> Option<Result<Decision, AgentError>> {
    let value = obj.get("ask_user")?;
    Some(shape::<AskUserShape>("ask_user", value).map(|a| {
        if a.missing_fields.is_empty() {
            Decision::Stop { reason: a.question }
        } else {
            Decision::AskUser {
                question: a.question,
                missing_fields: a.missing_fields,
            }
        }
    }))
}

/// 解析模型输出为 Decision
pub fn parse_decision(output: &str) -> Result<Decision, AgentError> {
    let payload = strip_code_fence(output);
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| AgentError::DecisionParse(format!("{}: {}", e, payload)))?;
    let obj = value.as_object().ok_or_else(|| {
        AgentError::DecisionParse(format!("expected a JSON object, got: {}", payload))
    })?;

    for (shape_name, matcher) in SHAPE_MATCHERS {
        if let Some(result) = matcher(obj) {
            if *shape_name != "action" {
                tracing::debug!(shape = *shape_name, "decision parsed from alternate shape");
            }
            return result;
        }
    }
    Err(AgentError::DecisionParse(format!(
        "no 'action' field and no recognized alternate shape: {}",
        payload
    )))
}
