//! Fingerprint-keyed output cache key derivation (spec §4.4).
//!
//! A fingerprint is the hex SHA-256 of the task kind concatenated with the
//! canonical (key-sorted) JSON encoding of its resolved input. Canonicalizing
//! key order means two inputs that differ only in object-key insertion order
//! hash identically.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively sort object keys so structurally-equal JSON values always
/// serialize identically regardless of construction order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, Value> = std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize(v));
            }
            serde_json::to_value(sorted).unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compute the fingerprint for `(kind, input)`. Stable across process
/// restarts and across Rust's `HashMap` iteration-order nondeterminism.
pub fn fingerprint(kind: &str, input: &Value) -> String {
    let canonical = canonicalize(input);
    let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"\0");
    hasher.update(&encoded);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_input_different_key_order_same_fingerprint() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(fingerprint("add", &a), fingerprint("add", &b));
    }

    #[test]
    fn different_kind_different_fingerprint() {
        let input = json!({"x": 1});
        assert_ne!(fingerprint("add", &input), fingerprint("sub", &input));
    }

    #[test]
    fn different_input_different_fingerprint() {
        assert_ne!(
            fingerprint("add", &json!({"x": 1})),
            fingerprint("add", &json!({"x": 2}))
        );
    }
}
