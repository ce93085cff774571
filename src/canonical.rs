//! Canonical JSON
//!
//! The same record must always serialize to the same bytes: published
//! documents are compared byte-for-byte and their codes must be reproducible.
//! Object keys are sorted recursively, arrays keep their order, output is
//! compact UTF-8.

use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

/// Normalize JSON for deterministic output
///
/// - Object keys are sorted (recursive)
/// - Arrays preserve order
/// - Nulls, bools, numbers, strings unchanged
pub fn canonicalize_json(v: &JsonValue) -> JsonValue {
    match v {
        JsonValue::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();

            let mut sorted = serde_json::Map::new();
            for k in keys {
                if let Some(child) = map.get(k) {
                    sorted.insert(k.clone(), canonicalize_json(child));
                }
            }
            JsonValue::Object(sorted)
        }
        JsonValue::Array(arr) => JsonValue::Array(arr.iter().map(canonicalize_json).collect()),
        other => other.clone(),
    }
}

/// Canonical compact JSON text for any serializable value
pub fn to_canonical_string<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&canonicalize_json(&value))
}

/// SHA-256 of arbitrary bytes, lower-case hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_change_output() {
        let a = json!({"b": 1, "a": {"y": [3, 1], "x": null}});
        let b = json!({"a": {"x": null, "y": [3, 1]}, "b": 1});
        assert_eq!(
            to_canonical_string(&a).unwrap(),
            to_canonical_string(&b).unwrap()
        );
        assert_eq!(
            to_canonical_string(&a).unwrap(),
            r#"{"a":{"x":null,"y":[3,1]},"b":1}"#
        );
    }

    #[test]
    fn test_arrays_keep_order() {
        let v = json!([{"b": 2, "a": 1}, 0]);
        assert_eq!(to_canonical_string(&v).unwrap(), r#"[{"a":1,"b":2},0]"#);
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
