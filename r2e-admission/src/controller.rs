//! The admission pipeline: idempotency lookup, lifecycle gate, routing,
//! policy evaluation, rate limiting, cost estimation, and reservation —
//! in the fixed order the external contract promises callers.

use std::collections::HashMap;
use std::time::Duration;

use r2e_codec::canonical_json;
use r2e_ledger::{budget, ExecutionState, WebhookSink};
use r2e_policy::{evaluate_request, PolicyDecision, PolicyPlugin};
use r2e_router::{resolve_route, ConfigLoader, RoutePlan};
use r2e_rate_limit::RateLimitRegistry;
use serde_json::Value;
use sqlx::PgPool;

use crate::agent::AgentRecord;
use crate::cost::estimate_cost;
use crate::error::AdmissionError;
use crate::idempotency::{execution_id_for_request, IDEMPOTENCY_HEADER, STEP_HEADER};
use crate::rate_limit::check_rate_limit;

/// Default reservation TTL, matching §5's backstop value.
pub const DEFAULT_RESERVATION_TTL_SECONDS: i64 = 180;
/// Default bound on idempotency polling (§5).
pub const DEFAULT_IDEMPOTENCY_WAIT_MS: u64 = 5_000;
/// Default poll interval while waiting on an in-flight execution.
pub const DEFAULT_IDEMPOTENCY_POLL_MS: u64 = 100;

/// Everything the admission controller needs about one inbound request,
/// already stripped of transport concerns (the HTTP layer extracts these
/// from headers/body before calling in).
pub struct AdmissionRequest<'a> {
    pub agent: &'a AgentRecord,
    pub endpoint: &'a str,
    pub body: Value,
    pub idempotency_key: Option<&'a str>,
    pub step_id: Option<&'a str>,
    pub explicit_execution_id: Option<&'a str>,
    pub header_tenant_id: Option<&'a str>,
    pub header_project_id: Option<&'a str>,
}

/// A successfully admitted request: a RESERVED execution plus everything
/// the proxy dispatcher needs to build and settle the upstream call.
#[derive(Debug, Clone)]
pub struct AdmissionResult {
    pub execution_id: String,
    pub request_hash: String,
    pub route_plan: RoutePlan,
    pub patched_body: Value,
    pub estimated_cost_micro: i64,
    pub tenant_id: String,
    pub project_id: String,
    pub policy_hash: String,
    pub policy_decision: PolicyDecision,
}

/// A cached terminal result returned instead of re-admitting — the
/// idempotent-replay branch of the contract.
#[derive(Debug, Clone)]
pub struct ReplayResult {
    pub execution_id: String,
    pub state: ExecutionState,
    pub status_code: Option<i32>,
    pub response_body: Option<Value>,
    pub error_body: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum AdmissionOutcome {
    Admitted(AdmissionResult),
    Replay(ReplayResult),
}

/// Merge a plugin patch (whitelisted keys only, already filtered by the
/// policy engine) into the request body.
fn apply_patch(mut body: Value, patch: &serde_json::Map<String, Value>) -> Value {
    if let Value::Object(ref mut map) = body {
        for (k, v) in patch {
            map.insert(k.clone(), v.clone());
        }
    }
    body
}

/// Poll `get_execution_cache` until the execution reaches a terminal
/// state or `wait_ms` elapses. Used when admission discovers a
/// non-terminal execution already bound to this execution_id — i.e.
/// another request is in flight for the same idempotency key.
async fn wait_for_terminal(
    pool: &PgPool,
    execution_id: &str,
    expected_request_hash: &str,
    wait_ms: u64,
    poll_ms: u64,
) -> Result<Option<ReplayResult>, AdmissionError> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(wait_ms);
    loop {
        if let Some(cached) = budget::get_execution_cache(pool, execution_id).await? {
            if cached.state.is_terminal() {
                if let Some(stored_hash) = &cached.request_hash {
                    if stored_hash != expected_request_hash {
                        return Err(AdmissionError::IdempotencyConflict);
                    }
                }
                return Ok(Some(ReplayResult {
                    execution_id: execution_id.to_string(),
                    state: cached.state,
                    status_code: cached.status_code,
                    response_body: cached.response_body,
                    error_body: cached.error_body,
                }));
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(Duration::from_millis(poll_ms)).await;
    }
}

/// Run the full admission pipeline for one request. See §4.2 for the
/// fixed step order this function implements.
#[allow(clippy::too_many_arguments)]
pub async fn admit(
    pool: &PgPool,
    webhooks: &dyn WebhookSink,
    router_config: &ConfigLoader,
    policy_plugins: &[Box<dyn PolicyPlugin>],
    rate_limit_fast: Option<&RateLimitRegistry>,
    headers: &HashMap<String, String>,
    req: AdmissionRequest<'_>,
) -> Result<AdmissionOutcome, AdmissionError> {
    // Step 1: lifecycle gate.
    if !req.agent.is_ready() {
        return Err(AdmissionError::AgentLocked(req.agent.lifecycle_state.clone()));
    }

    // Step 2: route resolve.
    let model_name = req
        .body
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AdmissionError::ModelNotAllowed("request body is missing 'model'".to_string()))?;
    let route_plan = resolve_route(router_config, req.endpoint, &model_name)?;

    // Step 3: execution_id derivation.
    let idem_header = req
        .idempotency_key
        .or_else(|| headers.get(IDEMPOTENCY_HEADER).map(String::as_str));
    let step_header = req.step_id.or_else(|| headers.get(STEP_HEADER).map(String::as_str));
    let (execution_id, request_hash) = execution_id_for_request(
        &req.agent.name,
        req.endpoint,
        &req.body,
        idem_header,
        step_header,
        req.explicit_execution_id,
    );

    // Step 4: idempotency lookup.
    if let Some(cached) = budget::get_execution_cache(pool, &execution_id).await? {
        if cached.state.is_terminal() {
            if let Some(stored_hash) = &cached.request_hash {
                if stored_hash != &request_hash {
                    return Err(AdmissionError::IdempotencyConflict);
                }
            }
            return Ok(AdmissionOutcome::Replay(ReplayResult {
                execution_id,
                state: cached.state,
                status_code: cached.status_code,
                response_body: cached.response_body,
                error_body: cached.error_body,
            }));
        }
        if let Some(replay) =
            wait_for_terminal(pool, &execution_id, &request_hash, DEFAULT_IDEMPOTENCY_WAIT_MS, DEFAULT_IDEMPOTENCY_POLL_MS).await?
        {
            return Ok(AdmissionOutcome::Replay(replay));
        }
        return Err(AdmissionError::ExecutionInProgress);
    }

    // Step 5: scope resolve.
    if let Some(tenant) = req.header_tenant_id.filter(|s| !s.trim().is_empty()) {
        if tenant.trim() != req.agent.tenant_id {
            return Err(AdmissionError::TenantMismatch);
        }
    }
    if let Some(project) = req.header_project_id.filter(|s| !s.trim().is_empty()) {
        if project.trim() != req.agent.project_id {
            return Err(AdmissionError::ProjectMismatch);
        }
    }

    // Step 6: rate limit.
    check_rate_limit(pool, rate_limit_fast, &req.agent.name, &req.agent.tenant_id, &req.agent.project_id).await?;

    // Step 7: policy.
    let caps = req.agent.caps();
    let decision = evaluate_request(&caps, &req.body, &model_name, req.endpoint, &execution_id, policy_plugins);
    if !decision.allow {
        let reason = decision.reason.clone().unwrap_or_else(|| "denied by policy".to_string());
        return Err(AdmissionError::PolicyDenied(reason));
    }
    let patched_body = apply_patch(req.body, &decision.patch);

    // Step 8: cost estimate.
    let model = router_config
        .get_model(&model_name)
        .ok_or_else(|| AdmissionError::ModelNotAllowed(format!("Model '{model_name}' not allowed")))?;
    let estimated_cost_micro = estimate_cost(&route_plan.upstream_path, &patched_body, &model)
        .ok_or_else(|| AdmissionError::UnsupportedEndpoint(format!("Unsupported endpoint '{}'", req.endpoint)))?;

    // Step 9: reservation.
    let policy_hash = decision.decision_hash.clone();
    let reservation = budget::reserve(
        pool,
        webhooks,
        &req.agent.name,
        Some(&req.agent.tenant_id),
        Some(&req.agent.project_id),
        &execution_id,
        req.endpoint,
        &request_hash,
        estimated_cost_micro,
        Some(&policy_hash),
        Some(&route_plan.route_hash),
        DEFAULT_RESERVATION_TTL_SECONDS,
    )
    .await?;

    if reservation.reused {
        if let Some(state) = reservation.state {
            if state.is_terminal() {
                return Ok(AdmissionOutcome::Replay(ReplayResult {
                    execution_id,
                    state,
                    status_code: reservation.status_code,
                    response_body: reservation.response_body,
                    error_body: reservation.error_body,
                }));
            }
        }
        // Reused a RESERVED-but-not-terminal sibling: wait it out like any
        // other in-flight execution rather than double-dispatching.
        if let Some(replay) =
            wait_for_terminal(pool, &execution_id, &request_hash, DEFAULT_IDEMPOTENCY_WAIT_MS, DEFAULT_IDEMPOTENCY_POLL_MS).await?
        {
            return Ok(AdmissionOutcome::Replay(replay));
        }
        return Err(AdmissionError::ExecutionInProgress);
    }

    tracing::info!(
        execution_id = %execution_id,
        agent = %req.agent.name,
        endpoint = req.endpoint,
        estimated_micro = estimated_cost_micro,
        route_hash = %route_plan.route_hash,
        "admitted"
    );

    Ok(AdmissionOutcome::Admitted(AdmissionResult {
        execution_id,
        request_hash,
        route_plan,
        patched_body,
        estimated_cost_micro,
        tenant_id: req.agent.tenant_id.clone(),
        project_id: req.agent.project_id.clone(),
        policy_hash,
        policy_decision: decision,
    }))
}

/// Byte-for-byte canonical comparison used by the v2 API's
/// `idempotent_replay` flag semantics (scenario 3 in the testable
/// properties): two bodies are the "same" request iff their canonical
/// JSON matches.
pub fn bodies_are_equivalent(a: &Value, b: &Value) -> bool {
    canonical_json(a) == canonical_json(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_only_overwrites_provided_keys() {
        let body = json!({"messages": [], "max_tokens": 10});
        let mut patch = serde_json::Map::new();
        patch.insert("max_tokens".to_string(), json!(5));
        let patched = apply_patch(body, &patch);
        assert_eq!(patched["max_tokens"], 5);
        assert!(patched["messages"].is_array());
    }

    #[test]
    fn bodies_are_equivalent_ignores_key_order() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert!(bodies_are_equivalent(&a, &b));
    }

    #[test]
    fn bodies_are_equivalent_detects_difference() {
        let a = json!({"messages": [{"role": "user", "content": "hi"}]});
        let b = json!({"messages": [{"role": "user", "content": "bye"}]});
        assert!(!bodies_are_equivalent(&a, &b));
    }
}
