//! MQTT 消息体解析
//!
//! 消息体为 JSON 对象，已知字段：`title`、`body`、`data`、`tokens`、`priority`、`ttl`。
//! 未知字段直接忽略；字段缺失时使用默认值，只有无法解码为 JSON 对象时才拒绝。

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::ParseError;
use crate::push::types::{NotificationRequest, Priority};

/// 将原始字节解析为推送请求
pub fn parse(raw: &[u8]) -> Result<NotificationRequest, ParseError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let object = match value {
        Value::Object(object) => object,
        other => {
            return Err(ParseError::Malformed(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            )))
        }
    };

    let (tokens, tokens_explicit) = tokens_field(&object);

    Ok(NotificationRequest {
        title: string_field(&object, "title"),
        body: string_field(&object, "body"),
        data: data_field(&object),
        tokens,
        tokens_explicit,
        priority: priority_field(&object),
        ttl: ttl_field(&object),
    })
}

fn string_field(object: &Map<String, Value>, key: &str) -> String {
    object.get(key).and_then(value_to_string).unwrap_or_default()
}

/// 非字符串值转为其 JSON 文本，null 视为缺失
fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn data_field(object: &Map<String, Value>) -> HashMap<String, String> {
    match object.get("data") {
        Some(Value::Object(data)) => data
            .iter()
            .filter_map(|(k, v)| value_to_string(v).map(|v| (k.clone(), v)))
            .collect(),
        _ => HashMap::new(),
    }
}

/// 返回清洗后的 token 列表，以及消息是否显式指定了目标
///
/// 缺失、null、空数组、空字符串视为未指定（走目录）；其余取值都算显式指定，
/// 其中无法使用的元素（非字符串、空白）被丢弃，清洗后可能为空。
fn tokens_field(object: &Map<String, Value>) -> (Option<Vec<String>>, bool) {
    match object.get("tokens") {
        None | Some(Value::Null) => (None, false),
        Some(Value::Array(items)) => {
            let tokens = items
                .iter()
                .filter_map(|item| item.as_str())
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .collect();
            (Some(tokens), !items.is_empty())
        }
        Some(Value::String(token)) if token.is_empty() => (None, false),
        // 单个 token 也接受
        Some(Value::String(token)) => {
            let token = token.trim();
            let tokens = if token.is_empty() {
                Vec::new()
            } else {
                vec![token.to_string()]
            };
            (Some(tokens), true)
        }
        Some(_) => (Some(Vec::new()), true),
    }
}

fn priority_field(object: &Map<String, Value>) -> Priority {
    object
        .get("priority")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Priority>().ok())
        .unwrap_or_default()
}

fn ttl_field(object: &Map<String, Value>) -> Option<u64> {
    match object.get("ttl")? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
