//! Prototype-pollution-safe JSON sanitization: parse into a neutral tree,
//! then filter forbidden keys. `serde_json::Value` already is that
//! neutral tree, so sanitization is a post-parse recursive filter rather
//! than a custom parser.

use serde_json::Value;

const FORBIDDEN_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Recursively strip `__proto__`, `constructor`, and `prototype` keys from
/// every object in `value`, at every depth.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if FORBIDDEN_KEYS.contains(&key.as_str()) {
                    continue;
                }
                out.insert(key, sanitize_value(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        scalar => scalar,
    }
}
