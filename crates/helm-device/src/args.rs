//! Argument extraction for tool calls.

use helm_core::ToolError;
use serde_json::{Map, Value};

/// A position given as `[x, y]` or `{"x": .., "y": ..}`.
pub fn position(args: &Map<String, Value>, key: &str) -> Result<Option<(i64, i64)>, ToolError> {
    let Some(raw) = args.get(key) else {
        return Ok(None);
    };
    let pair = match raw {
        Value::Null => return Ok(None),
        Value::Array(items) if items.len() == 2 => (coord(&items[0]), coord(&items[1])),
        Value::Object(map) => (
            map.get("x").and_then(coord),
            map.get("y").and_then(coord),
        ),
        _ => (None, None),
    };
    match pair {
        (Some(x), Some(y)) => Ok(Some((x, y))),
        _ => Err(ToolError::InvalidArguments(format!(
            "'{key}' must be [x, y] with integer coordinates, got {raw}"
        ))),
    }
}

fn coord(v: &Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64))
}

/// An optional string argument. Non-string values are rejected.
pub fn text<'a>(args: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "'{key}' must be a string, got {other}"
        ))),
    }
}

pub fn number(args: &Map<String, Value>, key: &str) -> Result<Option<u64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            ToolError::InvalidArguments(format!("'{key}' must be a non-negative integer, got {v}"))
        }),
    }
}

pub fn require<T>(value: Option<T>, action: &str, what: &str) -> Result<T, ToolError> {
    value.ok_or_else(|| ToolError::InvalidArguments(format!("{what} required for '{action}'")))
}
