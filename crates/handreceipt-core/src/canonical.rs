//! Canonical JSON encoding used as the pre-image for every hash in this
//! crate (ledger entries, QR payloads).
//!
//! Canonical form: object keys sorted ascending, no insignificant
//! whitespace, strings NFC-normalized, numbers preserved as written by
//! `serde_json` (integers stay integers, floats stay IEEE-754 decimal).

use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

/// Re-serialize a JSON value into its canonical byte form.
pub fn canonicalize(value: &Value) -> String {
    let normalized = normalize(value);
    serde_json::to_string(&normalized).expect("canonical value always serializes")
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.nfc().collect::<String>()),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => {
            // BTreeMap sorts keys ascending; serde_json serializes maps in
            // iteration order, so collecting through one gives us the
            // canonical key ordering for free.
            let sorted: std::collections::BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.nfc().collect::<String>(), normalize(v)))
                .collect();
            serde_json::to_value(sorted).expect("sorted map always serializes")
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_ascending() {
        let value = json!({"b": 1, "a": 2});
        assert_eq!(canonicalize(&value), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn is_idempotent() {
        let value = json!({"z": [3, 2, 1], "a": {"y": 1, "x": 2}});
        let once = canonicalize(&value);
        let twice = canonicalize(&serde_json::from_str(&once).unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn normalizes_unicode_strings() {
        // "e" + combining acute accent (NFD) should canonicalize the same
        // as the single precomposed "é" (NFC).
        let nfd = json!({"name": "e\u{0301}cole"});
        let nfc = json!({"name": "\u{00e9}cole"});
        assert_eq!(canonicalize(&nfd), canonicalize(&nfc));
    }
}
