//! Turning command-line literals into parameter values
//!
//! Unless the caller asks for a raw string, the trimmed input is decoded as:
//!
//! | input                              | value                       |
//! |------------------------------------|-----------------------------|
//! | `true`, `false`                    | boolean                     |
//! | `null`                             | null                        |
//! | `42`, `-7` (fits in i64)           | integer                     |
//! | `1.5`, `-2e3`, `6.02E23` (finite)  | float                       |
//! | `[...]`, `{...}` that parse as JSON| list / mapping              |
//! | anything else                      | the input string, untouched |
//!
//! Integers with leading zeros (`007`) and integers that overflow i64 stay
//! strings, so identifiers and long numeric IDs survive unchanged.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml_ng::{Number, Value};

static INTEGER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?(0|[1-9][0-9]*)$").expect("valid integer pattern"));

static FLOAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?(0|[1-9][0-9]*)(\.[0-9]+([eE][+-]?[0-9]+)?|[eE][+-]?[0-9]+)$")
        .expect("valid float pattern")
});

/// Decode `raw` into a parameter value
pub fn decode(raw: &str, as_string: bool) -> Value {
    if as_string {
        return Value::String(raw.to_string());
    }

    let trimmed = raw.trim();
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }

    if INTEGER.is_match(trimmed) {
        if let Ok(n) = trimmed.parse::<i64>() {
            return Value::Number(Number::from(n));
        }
        return Value::String(raw.to_string());
    }

    if FLOAT.is_match(trimmed) {
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Value::Number(Number::from(f));
            }
        }
        return Value::String(raw.to_string());
    }

    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if let Ok(value) = serde_yaml_ng::to_value(json) {
                return value;
            }
        }
    }

    Value::String(raw.to_string())
}

/// Render a value on one line for display
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{other:?}")),
    }
}
