//! Shared sensitive-key redaction for payloads that cross trust boundaries.

/// Key substrings whose string values are masked wherever they appear.
const SENSITIVE_KEYS: &[&str] = &["key", "secret", "token", "password", "authorization"];

/// Recursively replace values under sensitive keys with a marker.
///
/// Applied to signal payloads before they are handed back to callers, and
/// available to anything else that echoes caller-provided JSON.
pub fn redact_sensitive(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                if SENSITIVE_KEYS.iter().any(|k| key_lower.contains(k)) {
                    if !val.is_null() {
                        *val = serde_json::json!("***REDACTED***");
                    }
                } else {
                    redact_sensitive(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                redact_sensitive(item);
            }
        }
        _ => {}
    }
}
