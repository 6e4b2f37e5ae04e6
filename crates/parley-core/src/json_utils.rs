/// Shallow-merges the keys of `b` into `a`. Non-object inputs leave `a` untouched.
pub fn merge(a: serde_json::Value, b: serde_json::Value) -> serde_json::Value {
    match (a, b) {
        (serde_json::Value::Object(mut a_map), serde_json::Value::Object(b_map)) => {
            b_map.into_iter().for_each(|(key, value)| {
                a_map.insert(key, value);
            });
            serde_json::Value::Object(a_map)
        }
        (a, _) => a,
    }
}

pub fn merge_inplace(a: &mut serde_json::Value, b: serde_json::Value) {
    if let (serde_json::Value::Object(a_map), serde_json::Value::Object(b_map)) = (a, b) {
        b_map.into_iter().for_each(|(key, value)| {
            a_map.insert(key, value);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge() {
        let a = serde_json::json!({"model": "claude-3-haiku-20240307", "max_tokens": 500});
        let b = serde_json::json!({"max_tokens": 1024, "stream": true});
        let result = merge(a, b);
        let expected = serde_json::json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 1024,
            "stream": true
        });
        assert_eq!(result, expected);
    }

    #[test]
    fn test_merge_inplace() {
        let mut a = serde_json::json!({"model": "claude-3-haiku-20240307"});
        let b = serde_json::json!({"metadata": {"user_id": "u-1"}});
        merge_inplace(&mut a, b);
        let expected = serde_json::json!({
            "model": "claude-3-haiku-20240307",
            "metadata": {"user_id": "u-1"}
        });
        assert_eq!(a, expected);
    }

    #[test]
    fn test_merge_ignores_non_objects() {
        let a = serde_json::json!({"model": "claude-3-haiku-20240307"});
        let result = merge(a.clone(), serde_json::json!(["not", "an", "object"]));
        assert_eq!(result, a);
    }
}
