//! Secret redaction for logs and persisted records
//!
//! Any JSON value that might carry credentials goes through `redacted_value`
//! before it is formatted into a log line or written to disk. Matching is by
//! key name, case-insensitive substring, so `api_key`, `ADMIN_TOKEN`,
//! `youtube_cookies` and `Authorization` are all caught.

use serde_json::Value;

/// Key fragments whose values are always replaced.
const SECRET_KEY_FRAGMENTS: &[&str] = &["api_key", "authorization", "token", "cookie", "secret"];

/// Placeholder written in place of a secret value.
pub const REDACTED: &str = "***";

/// Returns true when a key names a secret-bearing field.
pub fn is_secret_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SECRET_KEY_FRAGMENTS.iter().any(|fragment| lower.contains(fragment))
}

/// Deep-copy `value`, replacing the value of every secret-bearing key with
/// `"***"`. Non-object scalars pass through unchanged.
pub fn redacted_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if is_secret_key(key) {
                    // Null secrets stay null: nothing to hide, and the shape
                    // still tells the reader the field was unset.
                    if val.is_null() {
                        out.insert(key.clone(), Value::Null);
                    } else {
                        out.insert(key.clone(), Value::String(REDACTED.to_string()));
                    }
                } else {
                    out.insert(key.clone(), redacted_value(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redacted_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replaces_secret_values() {
        let input = json!({
            "api_key": "sk-12345",
            "base_url": "https://api.example.com",
            "nested": {
                "Authorization": "Bearer abc",
                "model": "gpt-x"
            }
        });

        let out = redacted_value(&input);
        assert_eq!(out["api_key"], "***");
        assert_eq!(out["base_url"], "https://api.example.com");
        assert_eq!(out["nested"]["Authorization"], "***");
        assert_eq!(out["nested"]["model"], "gpt-x");
    }

    #[test]
    fn key_match_is_substring_and_case_insensitive() {
        assert!(is_secret_key("admin_token"));
        assert!(is_secret_key("YOUTUBE_COOKIES"));
        assert!(is_secret_key("Api_Key"));
        assert!(is_secret_key("shared_secret"));
        assert!(!is_secret_key("base_url"));
        assert!(!is_secret_key("model"));
    }

    #[test]
    fn walks_arrays() {
        let input = json!([{"token": "t1"}, {"token": "t2"}, {"name": "n"}]);
        let out = redacted_value(&input);
        assert_eq!(out[0]["token"], "***");
        assert_eq!(out[1]["token"], "***");
        assert_eq!(out[2]["name"], "n");
    }

    #[test]
    fn null_secret_stays_null() {
        let input = json!({"admin_token": null});
        let out = redacted_value(&input);
        assert!(out["admin_token"].is_null());
    }

    #[test]
    fn original_value_is_untouched() {
        let input = json!({"secret": "keep-me"});
        let _ = redacted_value(&input);
        assert_eq!(input["secret"], "keep-me");
    }
}
