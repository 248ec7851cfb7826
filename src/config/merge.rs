//! Layer merging
//!
//! - Tables: deep-merge by key
//! - Arrays: replaced by the later layer
//! - Scalars: later layer wins

use serde_json::Value;

/// Deep merge `overlay` onto `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Merge layers in order; the last layer has the highest precedence
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_deep_merge() {
        let base = json!({"tracking": {"poll_interval_ms": 3000, "max_retries": 3}});
        let overlay = json!({"tracking": {"max_retries": 5}});
        let result = deep_merge(base, overlay);

        assert_eq!(result["tracking"]["max_retries"], 5);
        assert_eq!(result["tracking"]["poll_interval_ms"], 3000);
    }

    #[test]
    fn test_array_replaced() {
        let result = deep_merge(json!({"zones": ["a", "b"]}), json!({"zones": ["c"]}));
        assert_eq!(result["zones"], json!(["c"]));
    }

    #[test]
    fn test_layer_precedence() {
        let result = merge_layers(vec![
            json!({"log": {"filter": "info", "format": "compact"}, "notify": {"backend": "log"}}),
            json!({"log": {"filter": "debug"}}),
            json!({"notify": {"backend": "sendmail", "recipient": "ops@example.com"}}),
            json!({"log": {"filter": "warn"}}),
        ]);

        assert_eq!(result["log"]["filter"], "warn");
        assert_eq!(result["log"]["format"], "compact");
        assert_eq!(result["notify"]["backend"], "sendmail");
        assert_eq!(result["notify"]["recipient"], "ops@example.com");
    }
}
