//! JSON Schema 生成与校验辅助
//!
//! - decision_format_schema_json：用 schemars 生成「合法决策」的 JSON 结构，注入 Planner 的 system prompt
//! - input_schema：把工具的参数声明编译为 JSON Schema 对象
//! - validate：用 jsonschema 校验，返回全部错误
//! - repair_output：输出 schema 不匹配时的有界修复（唯一字段改名）

use schemars::{schema_for, JsonSchema};
use serde_json::{json, Map, Value};

use crate::tools::{ParamType, ParameterSpec};

/// 决策输出格式：与 Planner 解析的 `{"action": "...", ...}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
enum DecisionFormat {
    /// 调用一个工具
    CallTool {
        /// 工具 id，必须来自 Available tools
        name: String,
        /// 工具参数
        args: Map<String, Value>,
    },
    /// 缺少必要信息，向用户提问
    AskUser {
        question: String,
        missing_fields: Vec<String>,
    },
    /// 重新拆分子目标
    Replan { subgoals: Vec<String> },
    /// 结束；目标达成时 reason 中包含 "achieved"
    Stop { reason: String },
}

/// 返回决策格式的 JSON Schema 字符串，可拼入 system prompt
pub fn decision_format_schema_json() -> String {
    let schema = schema_for!(DecisionFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

fn type_schema(kind: ParamType, item_type: Option<ParamType>) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("type".to_string(), json!(kind.as_str()));
    if let (ParamType::Array, Some(item)) = (kind, item_type) {
        m.insert("items".to_string(), json!({ "type": item.as_str() }));
    }
    m
}

/// 参数声明 -> JSON Schema（object / properties / required）
pub fn input_schema(params: &[ParameterSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for p in params {
        let mut prop = type_schema(p.kind, p.item_type);
        if let Some(values) = &p.allowed_values {
            prop.insert("enum".to_string(), Value::Array(values.clone()));
        }
        if let Some(default) = &p.default {
            prop.insert("default".to_string(), default.clone());
        }
        if p.required {
            required.push(json!(p.name));
        }
        properties.insert(p.name.clone(), Value::Object(prop));
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// 为缺失的可选参数填入声明的默认值；null / 缺省的 args 视为空对象
pub fn apply_defaults(args: &Value, params: &[ParameterSpec]) -> Value {
    let mut obj = match args {
        Value::Object(m) => m.clone(),
        Value::Null => Map::new(),
        other => return other.clone(),
    };
    for p in params {
        if let Some(default) = &p.default {
            if !obj.contains_key(&p.name) {
                obj.insert(p.name.clone(), default.clone());
            }
        }
    }
    Value::Object(obj)
}

/// 缺失（或为 null）的必填参数名
pub fn missing_required(args: &Value, params: &[ParameterSpec]) -> Vec<String> {
    params
        .iter()
        .filter(|p| p.required)
        .filter(|p| args.get(&p.name).map_or(true, Value::is_null))
        .map(|p| p.name.clone())
        .collect()
}

/// 校验 instance；返回全部违规描述（空表示通过）。schema 本身非法时作为一条违规返回
pub fn validate(schema: &Value, instance: &Value) -> Vec<String> {
    match jsonschema::validator_for(schema) {
        Ok(validator) => validator
            .iter_errors(instance)
            .map(|e| format!("at '{}': {}", e.instance_path, e))
            .collect(),
        Err(e) => vec![format!("invalid JSON Schema document: {e}")],
    }
}

/// 有界修复：恰好缺一个必填属性、恰好多一个未声明属性时，把后者改名为前者
pub fn repair_output(raw: &Value, schema: &Value) -> Option<Value> {
    let obj = raw.as_object()?;
    let properties = schema.get("properties")?.as_object()?;
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|k| !obj.contains_key(*k))
        .collect();
    let undeclared: Vec<&String> = obj.keys().filter(|k| !properties.contains_key(*k)).collect();
    if missing.len() != 1 || undeclared.len() != 1 {
        return None;
    }

    let mut fixed = obj.clone();
    let value = fixed.remove(undeclared[0].as_str())?;
    fixed.insert(missing[0].to_string(), value);
    let fixed = Value::Object(fixed);
    validate(schema, &fixed).is_empty().then_some(fixed)
}
