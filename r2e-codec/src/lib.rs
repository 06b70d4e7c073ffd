//! Canonical JSON serialization and chained SHA-256 hashing.
//!
//! Every replay-safe identifier in AEX (`execution_id`, `request_hash`,
//! `policy_hash`, `route_hash`, `event_hash`) is derived from these two
//! primitives. Byte-identical inputs must yield byte-identical hashes
//! across processes and releases — do not change the canonicalization
//! rules without bumping `schema_version`.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Serialize `value` into canonical JSON: object keys sorted, no
/// insignificant whitespace, matching Python's
/// `json.dumps(value, sort_keys=True, separators=(",", ":"))`.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            // BTreeMap re-sorts keys lexicographically by UTF-8 byte order,
            // matching Python's `sort_keys=True`.
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).expect("string keys always serialize"));
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => {
            out.push_str(&other.to_string());
        }
    }
}

/// Serialize a `Serialize` value into canonical JSON in one step.
pub fn canonical_json_of<T: serde::Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    Ok(canonical_json(&v))
}

/// Compute `SHA-256(part_0 '\n' part_1 '\n' ... part_n '\n')` as lowercase hex.
///
/// This is the one hash function used everywhere a replayable identifier
/// is needed: `stable_hash(prev_hash, event_type, execution_id, canonical_payload)`
/// for event chain links, `stable_hash(agent, endpoint, idem_key)` for
/// execution ids, and so on.
pub fn stable_hash_hex<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Convenience wrapper for the common fixed-arity call sites.
#[macro_export]
macro_rules! stable_hash {
    ($($part:expr),+ $(,)?) => {
        $crate::stable_hash_hex([$($part.as_ref() as &str),+])
    };
}

mod hex {
    /// Minimal lowercase-hex encoder so this crate does not pull in a
    /// dedicated `hex` dependency for a single call site.
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        const TABLE: &[u8; 16] = b"0123456789abcdef";
        let bytes = bytes.as_ref();
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            out.push(TABLE[(b >> 4) as usize] as char);
            out.push(TABLE[(b & 0x0f) as usize] as char);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let value = json!({"b": 1, "a": 2});
        assert_eq!(canonical_json(&value), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonical_json_has_no_whitespace() {
        let value = json!({"a": [1, 2, 3], "b": "x"});
        let rendered = canonical_json(&value);
        assert!(!rendered.contains(' '));
    }

    #[test]
    fn canonical_json_round_trip_is_stable() {
        let value = json!({"z": 1, "a": {"y": 2, "x": 3}, "m": [3, 1, 2]});
        let once = canonical_json(&value);
        let parsed: Value = serde_json::from_str(&once).unwrap();
        let twice = canonical_json(&parsed);
        assert_eq!(once, twice);
        assert_eq!(parsed, value);
    }

    #[test]
    fn stable_hash_is_deterministic() {
        let a = stable_hash_hex(["agent-1", "chat", "hi"]);
        let b = stable_hash_hex(["agent-1", "chat", "hi"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn stable_hash_is_sensitive_to_part_boundaries() {
        // "ab","c" must not collide with "a","bc" — the '\n' separator enforces this.
        let joined = stable_hash_hex(["ab", "c"]);
        let split = stable_hash_hex(["a", "bc"]);
        assert_ne!(joined, split);
    }

    #[test]
    fn stable_hash_macro_matches_function() {
        let agent = "agent-1".to_string();
        let endpoint = "chat".to_string();
        assert_eq!(
            stable_hash!(agent, endpoint),
            stable_hash_hex([agent.as_str(), endpoint.as_str()])
        );
    }
}
