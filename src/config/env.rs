//! Environment layer
//!
//! `INSTANCE_OPS_<SECTION>__<KEY>=value` sets `[section] key = value`, e.g.
//! `INSTANCE_OPS_TRACKING__MAX_RETRIES=5`. Values that parse as integers or
//! booleans are typed accordingly; everything else is a string.

use serde_json::{Map, Value};

pub const ENV_PREFIX: &str = "INSTANCE_OPS_";

/// Build a config layer from environment variables.
///
/// Returns None when no variable carries the prefix.
pub fn env_layer<I>(vars: I) -> Option<Value>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut root = Map::new();

    for (key, raw) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = rest
            .split("__")
            .filter(|part| !part.is_empty())
            .map(|part| part.to_lowercase())
            .collect();
        if path.is_empty() {
            continue;
        }
        insert_path(&mut root, &path, parse_scalar(&raw));
    }

    if root.is_empty() {
        None
    } else {
        Some(Value::Object(root))
    }
}

fn insert_path(map: &mut Map<String, Value>, path: &[String], value: Value) {
    match path {
        [] => {}
        [last] => {
            map.insert(last.clone(), value);
        }
        [head, tail @ ..] => {
            let entry = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                insert_path(child, tail, value);
            }
        }
    }
}

fn parse_scalar(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<u64>() {
        return Value::from(n);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_nested_keys() {
        let layer = env_layer(vars(&[
            ("INSTANCE_OPS_TRACKING__MAX_RETRIES", "5"),
            ("INSTANCE_OPS_NOTIFY__RECIPIENT", "ops@example.com"),
            ("INSTANCE_OPS_LOG__FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(
            layer,
            json!({
                "tracking": {"max_retries": 5},
                "notify": {"recipient": "ops@example.com"},
                "log": {"format": "json"}
            })
        );
    }

    #[test]
    fn test_unrelated_vars_ignored() {
        assert!(env_layer(vars(&[("HOME", "/root"), ("INSTANCE_OPS_", "x")])).is_none());
    }

    #[test]
    fn test_scalar_typing() {
        assert_eq!(parse_scalar("42"), json!(42));
        assert_eq!(parse_scalar("true"), json!(true));
        assert_eq!(parse_scalar("us-central1-a"), json!("us-central1-a"));
    }
}
