//! OpenAI-compatible proxy endpoints: `/chat/completions`, `/responses`,
//! `/embeddings`. Shared admission → dispatch → settle flow; streaming
//! is only offered for chat completions (§6: Responses streaming is not
//! yet supported and returns 400).

use std::collections::HashMap;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Json, http::StatusCode};
use r2e_admission::{admit, AdmissionOutcome, AdmissionRequest};
use r2e_core::HttpError;
use r2e_proxy::{dispatch_non_streaming, dispatch_streaming};
use serde_json::Value;
use tokio_stream::StreamExt;

use crate::auth::AuthenticatedAgent;
use crate::state::AppState;

const TENANT_HEADER: &str = "x-aex-tenant-id";
const PROJECT_HEADER: &str = "x-aex-project-id";
const PROVIDER_KEY_HEADER: &str = "x-aex-provider-key";

pub(crate) fn lowercased_headers(headers: &axum::http::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_lowercase(), v.to_string())))
        .collect()
}

pub(crate) fn header_str<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers.get(name).map(String::as_str)
}

async fn run_admission(
    state: &AppState,
    agent: &r2e_admission::AgentRecord,
    endpoint: &str,
    body: Value,
    headers: &HashMap<String, String>,
) -> Result<AdmissionOutcome, HttpError> {
    let req = AdmissionRequest {
        agent,
        endpoint,
        body,
        idempotency_key: None,
        step_id: None,
        explicit_execution_id: None,
        header_tenant_id: header_str(headers, TENANT_HEADER),
        header_project_id: header_str(headers, PROJECT_HEADER),
    };

    admit(
        &state.pool,
        state.webhooks.as_ref(),
        &state.router_config,
        &state.policy_plugins,
        state.rate_limit_fast.as_ref(),
        headers,
        req,
    )
    .await
    .map_err(|err| {
        r2e_prometheus::record_admission_denied(&agent.name, &err.to_string());
        HttpError::from(err)
    })
}

fn replay_response(replay: r2e_admission::ReplayResult) -> Response {
    let status = StatusCode::from_u16(replay.status_code.unwrap_or(200) as u16).unwrap_or(StatusCode::OK);
    let body = replay.response_body.or(replay.error_body).unwrap_or(Value::Null);
    (status, Json(body)).into_response()
}

async fn dispatch_and_respond(
    state: &AppState,
    agent: &r2e_admission::AgentRecord,
    admission: r2e_admission::AdmissionResult,
    passthrough_key: Option<String>,
) -> Result<Response, HttpError> {
    let model = state
        .router_config
        .get_model(&admission.route_plan.requested_model)
        .ok_or_else(|| HttpError::Forbidden(format!("Model '{}' not allowed", admission.route_plan.requested_model)))?;
    let caps = agent.caps();
    let provider_key = passthrough_key.or_else(|| state.provider_api_key(&admission.route_plan.provider_name));
    let dimensions_denylist = state.router_config.dimensions_denylist();

    let outcome = dispatch_non_streaming(
        &state.http_client,
        &state.pool,
        state.webhooks.as_ref(),
        &admission,
        &model,
        &caps,
        &agent.name,
        provider_key.as_deref(),
        &dimensions_denylist,
    )
    .await
    .map_err(|err| {
        r2e_prometheus::record_settlement_released(&agent.name, "transport_or_policy_error");
        HttpError::from(err)
    })?;

    if outcome.status == 200 {
        r2e_prometheus::record_settlement_committed(&agent.name, &admission.route_plan.requested_model);
    } else {
        r2e_prometheus::record_settlement_released(&agent.name, "upstream_error");
    }

    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, Json(outcome.body)).into_response())
}

async fn dispatch_and_stream(
    state: &AppState,
    agent: &r2e_admission::AgentRecord,
    admission: r2e_admission::AdmissionResult,
    passthrough_key: Option<String>,
) -> Result<Response, HttpError> {
    let model = state
        .router_config
        .get_model(&admission.route_plan.requested_model)
        .ok_or_else(|| HttpError::Forbidden(format!("Model '{}' not allowed", admission.route_plan.requested_model)))?;
    let provider_key = passthrough_key.or_else(|| state.provider_api_key(&admission.route_plan.provider_name));
    let dimensions_denylist = state.router_config.dimensions_denylist();

    let byte_stream = dispatch_streaming(
        state.http_client.clone(),
        state.pool.clone(),
        state.webhooks.clone(),
        admission,
        model,
        agent.name.clone(),
        provider_key,
        &dimensions_denylist,
    )
    .await
    .map_err(HttpError::from)?;

    let event_stream = byte_stream.map(|chunk| {
        let bytes = chunk.unwrap_or_default();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok::<_, std::convert::Infallible>(Event::default().data(text))
    });

    Ok(Sse::new(event_stream).keep_alive(KeepAlive::default()).into_response())
}

fn is_streaming_request(body: &Value) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

/// Validates and extracts the `x-aex-provider-key` passthrough credential.
/// Agents without `allow_passthrough` may not set this header at all — the
/// request is rejected rather than silently ignoring the header.
fn extract_passthrough_key(
    agent: &r2e_admission::AgentRecord,
    headers: &HashMap<String, String>,
) -> Result<Option<String>, HttpError> {
    match header_str(headers, PROVIDER_KEY_HEADER) {
        Some(_) if !agent.allow_passthrough => Err(HttpError::Forbidden(
            "agent is not permitted to pass through a provider credential".to_string(),
        )),
        Some(key) => Ok(Some(key.to_string())),
        None => Ok(None),
    }
}

pub async fn chat_completions(
    State(state): State<AppState>,
    AuthenticatedAgent { agent, .. }: AuthenticatedAgent,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, HttpError> {
    let header_map = lowercased_headers(&headers);
    let passthrough_key = extract_passthrough_key(&agent, &header_map)?;
    let streaming = is_streaming_request(&body);
    let outcome = run_admission(&state, &agent, "/v1/chat/completions", body, &header_map).await?;

    match outcome {
        AdmissionOutcome::Replay(replay) => Ok(replay_response(replay)),
        AdmissionOutcome::Admitted(admission) if streaming => {
            dispatch_and_stream(&state, &agent, admission, passthrough_key).await
        }
        AdmissionOutcome::Admitted(admission) => {
            dispatch_and_respond(&state, &agent, admission, passthrough_key).await
        }
    }
}

pub async fn responses(
    State(state): State<AppState>,
    AuthenticatedAgent { agent, .. }: AuthenticatedAgent,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, HttpError> {
    if is_streaming_request(&body) {
        return Err(HttpError::BadRequest("streaming is not supported for /v1/responses".to_string()));
    }

    let header_map = lowercased_headers(&headers);
    let passthrough_key = extract_passthrough_key(&agent, &header_map)?;
    let outcome = run_admission(&state, &agent, "/v1/responses", body, &header_map).await?;

    match outcome {
        AdmissionOutcome::Replay(replay) => Ok(replay_response(replay)),
        AdmissionOutcome::Admitted(admission) => {
            dispatch_and_respond(&state, &agent, admission, passthrough_key).await
        }
    }
}

pub async fn embeddings(
    State(state): State<AppState>,
    AuthenticatedAgent { agent, .. }: AuthenticatedAgent,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, HttpError> {
    let header_map = lowercased_headers(&headers);
    let passthrough_key = extract_passthrough_key(&agent, &header_map)?;
    let outcome = run_admission(&state, &agent, "/v1/embeddings", body, &header_map).await?;

    match outcome {
        AdmissionOutcome::Replay(replay) => Ok(replay_response(replay)),
        AdmissionOutcome::Admitted(admission) => {
            dispatch_and_respond(&state, &agent, admission, passthrough_key).await
        }
    }
}
