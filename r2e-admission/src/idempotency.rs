//! Execution id derivation and canonical request hashing.

use r2e_codec::{canonical_json, stable_hash_hex};
use serde_json::Value;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
pub const STEP_HEADER: &str = "x-aex-step-id";

/// Request hash used for deterministic replay and cache identity.
pub fn canonical_request_hash(agent: &str, endpoint: &str, body: &Value, step_id: &str) -> String {
    let body_text = canonical_json(body);
    stable_hash_hex([agent, endpoint, step_id, body_text.as_str()])
}

/// Resolve `(execution_id, request_hash)` for an inbound request, in
/// priority order: explicit id (v2 API) > `Idempotency-Key` header >
/// the request hash itself.
pub fn execution_id_for_request(
    agent: &str,
    endpoint: &str,
    body: &Value,
    idempotency_key: Option<&str>,
    step_id: Option<&str>,
    explicit_execution_id: Option<&str>,
) -> (String, String) {
    let normalized_step = step_id.unwrap_or("").trim();
    let request_hash = canonical_request_hash(agent, endpoint, body, normalized_step);

    let forced = explicit_execution_id.unwrap_or("").trim();
    let execution_id = if !forced.is_empty() {
        forced.to_string()
    } else if let Some(key) = idempotency_key.map(str::trim).filter(|k| !k.is_empty()) {
        stable_hash_hex([agent, endpoint, key])
    } else {
        request_hash.clone()
    };

    (execution_id, request_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_execution_id_wins() {
        let (id, _) = execution_id_for_request("agent-1", "chat", &json!({}), Some("key"), None, Some("forced-id"));
        assert_eq!(id, "forced-id");
    }

    #[test]
    fn idempotency_key_used_when_no_explicit_id() {
        let (id, _) = execution_id_for_request("agent-1", "chat", &json!({}), Some("key"), None, None);
        assert_eq!(id, stable_hash_hex(["agent-1", "chat", "key"]));
    }

    #[test]
    fn falls_back_to_request_hash() {
        let body = json!({"messages": [{"role": "user", "content": "hi"}]});
        let (id, hash) = execution_id_for_request("agent-1", "chat", &body, None, None, None);
        assert_eq!(id, hash);
    }

    #[test]
    fn request_hash_is_sensitive_to_body() {
        let a = canonical_request_hash("agent-1", "chat", &json!({"a": 1}), "");
        let b = canonical_request_hash("agent-1", "chat", &json!({"a": 2}), "");
        assert_ne!(a, b);
    }
}
