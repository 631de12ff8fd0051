//! Deep merge of the remote governance sheet with the in-repo override.

use serde_json::Value;

/// Merge `overlay` over `base` (right-biased).
///
/// Objects merge key by key, recursively; any other overlay value replaces the
/// base value wholesale.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let value = match base_map.get(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}
