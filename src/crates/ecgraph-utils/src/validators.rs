//! Shape and emptiness predicates over JSON values.
//!
//! The engine treats node payloads as opaque [`serde_json::Value`]s; these
//! predicates are the shared vocabulary for "is this empty", "is this a
//! mapping" style checks used by validation and formatting code.

use serde_json::Value;

/// True when the value carries no usable content: JSON null, an empty
/// string, an empty array, or an empty object.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// True when the value is a JSON object.
pub fn is_mapping(value: &Value) -> bool {
    value.is_object()
}

/// True when the value is a JSON array.
pub fn is_sequence(value: &Value) -> bool {
    value.is_array()
}

/// True for non-empty strings.
pub fn is_non_empty_string(s: &str) -> bool {
    !s.is_empty()
}

/// True when the string looks like an endpoint the engine can reach: an
/// absolute `http(s)`/`ws(s)` URL or a `/`-rooted path.
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("ws://")
        || s.starts_with("wss://")
        || s.starts_with('/')
}
