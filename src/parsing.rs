use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::types::FailureKind;

// Opening fence with an optional language tag, e.g. ```json
static OPEN_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n?").expect("invalid regex"));

/// Result of pulling a structured record out of a response
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// A JSON object, values coerced to text, keys in response order
    Record(Vec<(String, String)>),
    Malformed { kind: FailureKind, cause: String },
}

/// Remove a surrounding code fence if there is one
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let inner = match OPEN_FENCE_RE.find(trimmed) {
        Some(m) => &trimmed[m.end()..],
        None => trimmed,
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Coerce a JSON value to cell text
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Strip the fence and classify what remains
pub fn extract_record(raw: &str) -> Extraction {
    let body = strip_code_fence(raw);
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Extraction::Record(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_text(v)))
                .collect(),
        ),
        Ok(other) => Extraction::Malformed {
            kind: FailureKind::UnexpectedShape,
            cause: format!("expected a JSON object, got {}", shape_name(&other)),
        },
        Err(e) => Extraction::Malformed {
            kind: FailureKind::ParseFailure,
            cause: e.to_string(),
        },
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
