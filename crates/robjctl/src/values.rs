//! Conversion between command-line text, remote values and JSON

use remote_objects::Value;
use serde_json::{Map, Number, json};

/// Parse one command-line argument.
///
/// `nil`, `true` and `false` are literals, numbers become integers or
/// floats, `:name` is a symbol and anything else is a string.
pub fn parse_arg(raw: &str) -> Value {
    match raw {
        "nil" => return Value::Nil,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int(i);
    }
    // "inf" and "nan" parse as floats but are meant as strings
    if raw.bytes().any(|b| b.is_ascii_digit())
        && let Ok(f) = raw.parse::<f64>()
    {
        return Value::Float(f);
    }
    match raw.strip_prefix(':') {
        Some(name) if !name.is_empty() => Value::sym(name),
        _ => Value::from(raw),
    }
}

/// JSON rendering of a value received from the peer.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Str(s) => json!(s),
        Value::Symbol(s) => json!(format!(":{s}")),
        Value::Bytes(bytes) => json!(bytes),
        Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Map(entries) => {
            let keyed = entries.iter().all(|(k, _)| k.as_str().is_some());
            if keyed {
                let object: Map<String, serde_json::Value> = entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), to_json(v)))
                    .collect();
                serde_json::Value::Object(object)
            } else {
                serde_json::Value::Array(
                    entries
                        .iter()
                        .map(|(k, v)| json!([to_json(k), to_json(v)]))
                        .collect(),
                )
            }
        }
        Value::Error(e) => json!({ "error": e.kind, "message": e.message }),
        Value::Object(_) => json!({ "object": value.inspect() }),
    }
}
