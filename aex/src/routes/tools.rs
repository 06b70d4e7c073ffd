//! `POST /v1/tools/execute` — a flat-cost settlement path parallel to the
//! model-routed proxy endpoints. Tool calls aren't priced per token and
//! don't resolve through [`r2e_router::resolve_route`], so this handler
//! runs its own miniature admission (lifecycle gate, idempotency,
//! reservation) directly against [`r2e_ledger::budget`] instead of
//! going through [`r2e_admission::admit`].

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{http::StatusCode, Json};
use r2e_admission::idempotency::execution_id_for_request;
use r2e_core::HttpError;
use r2e_ledger::budget;
use serde_json::{json, Value};

use crate::auth::AuthenticatedAgent;
use crate::state::AppState;
use crate::tools::resolve;

const ENDPOINT: &str = "/v1/tools/execute";
const RESERVATION_TTL_SECONDS: i64 = 60;

fn cached_to_response(status_code: Option<i32>, body: Option<Value>, error: Option<Value>) -> Response {
    let status = StatusCode::from_u16(status_code.unwrap_or(200) as u16).unwrap_or(StatusCode::OK);
    (status, Json(body.or(error).unwrap_or(Value::Null))).into_response()
}

pub async fn execute_tool(
    State(state): State<AppState>,
    AuthenticatedAgent { agent, .. }: AuthenticatedAgent,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, HttpError> {
    if !agent.is_ready() {
        return Err(HttpError::Locked(format!("agent state is {}; execution blocked", agent.lifecycle_state)));
    }
    let caps = agent.caps();
    if !caps.allow_tools {
        return Err(HttpError::Forbidden("agent is not permitted to execute tools".to_string()));
    }

    let tool_name = body
        .get("tool_name")
        .and_then(Value::as_str)
        .ok_or_else(|| HttpError::BadRequest("request body is missing 'tool_name'".to_string()))?
        .to_string();
    if let Some(allowed) = &caps.allowed_tool_names {
        if !allowed.iter().any(|name| name == &tool_name) {
            return Err(HttpError::Forbidden(format!("tool '{tool_name}' is not in this agent's allowlist")));
        }
    }
    let arguments = body.get("arguments").cloned().unwrap_or(Value::Null);

    let idempotency_key = headers
        .get(r2e_admission::idempotency::IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok());
    let (execution_id, request_hash) =
        execution_id_for_request(&agent.name, ENDPOINT, &body, idempotency_key, None, None);

    if let Some(cached) = budget::get_execution_cache(&state.pool, &execution_id)
        .await
        .map_err(|err| HttpError::from(r2e_admission::AdmissionError::from(err)))?
    {
        if cached.state.is_terminal() {
            if let Some(stored_hash) = &cached.request_hash {
                if stored_hash != &request_hash {
                    return Err(HttpError::Conflict(
                        "idempotency conflict: execution_id is already bound to a different request hash".to_string(),
                    ));
                }
            }
            return Ok(cached_to_response(cached.status_code, cached.response_body, cached.error_body));
        }
        return Err(HttpError::Conflict("execution is still in progress; retry later".to_string()));
    }

    let plugin = resolve(&tool_name);
    let estimated_cost_micro = crate::tools::DEFAULT_TOOL_COST_MICRO;

    let reservation = budget::reserve(
        &state.pool,
        state.webhooks.as_ref(),
        &agent.name,
        Some(&agent.tenant_id),
        Some(&agent.project_id),
        &execution_id,
        ENDPOINT,
        &request_hash,
        estimated_cost_micro,
        None,
        None,
        RESERVATION_TTL_SECONDS,
    )
    .await
    .map_err(|err| HttpError::from(r2e_admission::AdmissionError::from(err)))?;

    if reservation.reused {
        return Ok(cached_to_response(
            reservation.status_code,
            reservation.response_body,
            reservation.error_body,
        ));
    }

    budget::mark_dispatched(&state.pool, &execution_id)
        .await
        .map_err(|err| HttpError::from(r2e_admission::AdmissionError::from(err)))?;

    let outcome = plugin.execute(&arguments);

    budget::commit(
        &state.pool,
        state.webhooks.as_ref(),
        &agent.name,
        &execution_id,
        estimated_cost_micro,
        outcome.cost_micro,
        0,
        0,
        None,
        Some(outcome.result.clone()),
        200,
    )
    .await
    .map_err(|err| HttpError::from(r2e_admission::AdmissionError::from(err)))?;

    r2e_prometheus::record_settlement_committed(&agent.name, &tool_name);
    tracing::info!(execution_id = %execution_id, agent = %agent.name, tool = %tool_name, "tool executed");

    Ok((StatusCode::OK, Json(json!({ "execution_id": execution_id, "result": outcome.result }))).into_response())
}
