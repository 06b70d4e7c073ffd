//! The decoupled v2 API: a caller runs admission and settlement as two
//! separate round trips instead of letting AEX dispatch to the upstream
//! provider itself. This is the integration surface for callers that
//! front their own model access (a different provider SDK, an
//! on-prem model server) but still want the ledger, idempotency, and
//! policy guarantees the v1 proxy gives for free.

use axum::extract::State;
use axum::{http::StatusCode, Json};
use r2e_admission::{admit, AdmissionOutcome, AdmissionRequest};
use r2e_core::HttpError;
use r2e_ledger::budget;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::AuthenticatedAgent;
use crate::routes::proxy::{header_str, lowercased_headers};
use crate::state::AppState;

const TENANT_HEADER: &str = "x-aex-tenant-id";
const PROJECT_HEADER: &str = "x-aex-project-id";

#[derive(Deserialize)]
pub struct AdmissionCheckRequest {
    pub endpoint: String,
    pub body: Value,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub step_id: Option<String>,
}

#[derive(Serialize)]
pub struct AdmissionCheckResponse {
    pub execution_id: String,
    pub admitted: bool,
    pub idempotent_replay: bool,
    pub estimated_micro: Option<i64>,
    pub provider: Option<String>,
    pub provider_model: Option<String>,
    pub policy_hash: Option<String>,
    pub patched_body: Option<Value>,
    pub status_code: Option<i32>,
    pub response_body: Option<Value>,
    pub error_body: Option<Value>,
}

/// `POST /api/v2/admission/check` — run the full admission pipeline
/// (lifecycle, routing, idempotency, rate limit, policy, cost estimate,
/// reservation) without dispatching anywhere. The caller is expected to
/// perform its own upstream call and report back via settlement.
pub async fn admission_check(
    State(state): State<AppState>,
    AuthenticatedAgent { agent, .. }: AuthenticatedAgent,
    headers: axum::http::HeaderMap,
    Json(req): Json<AdmissionCheckRequest>,
) -> Result<Json<AdmissionCheckResponse>, HttpError> {
    let header_map = lowercased_headers(&headers);

    let admission_req = AdmissionRequest {
        agent: &agent,
        endpoint: &req.endpoint,
        body: req.body,
        idempotency_key: req.idempotency_key.as_deref(),
        step_id: req.step_id.as_deref(),
        explicit_execution_id: req.execution_id.as_deref(),
        header_tenant_id: header_str(&header_map, TENANT_HEADER),
        header_project_id: header_str(&header_map, PROJECT_HEADER),
    };

    let outcome = admit(
        &state.pool,
        state.webhooks.as_ref(),
        &state.router_config,
        &state.policy_plugins,
        state.rate_limit_fast.as_ref(),
        &header_map,
        admission_req,
    )
    .await
    .map_err(|err| {
        r2e_prometheus::record_admission_denied(&agent.name, &err.to_string());
        HttpError::from(err)
    })?;

    let response = match outcome {
        AdmissionOutcome::Admitted(admission) => AdmissionCheckResponse {
            execution_id: admission.execution_id,
            admitted: true,
            idempotent_replay: false,
            estimated_micro: Some(admission.estimated_cost_micro),
            provider: Some(admission.route_plan.provider_name.clone()),
            provider_model: Some(admission.route_plan.provider_model.clone()),
            policy_hash: Some(admission.policy_hash),
            patched_body: Some(admission.patched_body),
            status_code: None,
            response_body: None,
            error_body: None,
        },
        AdmissionOutcome::Replay(replay) => AdmissionCheckResponse {
            execution_id: replay.execution_id,
            admitted: false,
            idempotent_replay: true,
            estimated_micro: None,
            provider: None,
            provider_model: None,
            policy_hash: None,
            patched_body: None,
            status_code: replay.status_code,
            response_body: replay.response_body,
            error_body: replay.error_body,
        },
    };

    Ok(Json(response))
}

/// Look up the agent actually bound to an execution, so a settlement
/// call can be rejected before it touches another agent's ledger row —
/// `budget::commit`/`budget::release` trust the caller-supplied agent
/// name for their SQL writes and do not check this themselves.
async fn verify_owns_execution(state: &AppState, agent: &str, execution_id: &str) -> Result<(), HttpError> {
    let owner: Option<String> = sqlx::query_scalar("SELECT agent FROM executions WHERE execution_id = $1")
        .bind(execution_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|err| HttpError::Internal(err.to_string()))?;

    match owner {
        None => Err(HttpError::NotFound(format!("execution {execution_id} not found"))),
        Some(owner) if owner == agent => Ok(()),
        Some(_) => Err(HttpError::Forbidden("execution does not belong to this agent".to_string())),
    }
}

#[derive(Deserialize)]
pub struct SettlementCommitRequest {
    pub execution_id: String,
    pub estimated_micro: i64,
    #[serde(default)]
    pub actual_micro: i64,
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub response_body: Option<Value>,
    #[serde(default = "default_commit_status")]
    pub status_code: i32,
}

fn default_commit_status() -> i32 {
    200
}

/// `POST /api/v2/settlement/commit` — settle a reservation the caller
/// admitted earlier and dispatched itself. Idempotent: committing an
/// already-committed execution is a no-op, per [`budget::commit`].
pub async fn settlement_commit(
    State(state): State<AppState>,
    AuthenticatedAgent { agent, .. }: AuthenticatedAgent,
    Json(req): Json<SettlementCommitRequest>,
) -> Result<StatusCode, HttpError> {
    verify_owns_execution(&state, &agent.name, &req.execution_id).await?;

    budget::commit(
        &state.pool,
        state.webhooks.as_ref(),
        &agent.name,
        &req.execution_id,
        req.estimated_micro,
        req.actual_micro,
        req.prompt_tokens,
        req.completion_tokens,
        req.model.as_deref(),
        req.response_body,
        req.status_code,
    )
    .await
    .map_err(HttpError::from)?;

    r2e_prometheus::record_settlement_committed(&agent.name, req.model.as_deref().unwrap_or("unknown"));
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct SettlementReleaseRequest {
    pub execution_id: String,
    pub estimated_micro: i64,
    pub reason: String,
    #[serde(default)]
    pub status_code: Option<i32>,
}

/// `POST /api/v2/settlement/release` — give back a reservation the
/// caller is abandoning (its own upstream call failed or was never
/// made). Idempotent for the same reasons as commit.
pub async fn settlement_release(
    State(state): State<AppState>,
    AuthenticatedAgent { agent, .. }: AuthenticatedAgent,
    Json(req): Json<SettlementReleaseRequest>,
) -> Result<StatusCode, HttpError> {
    verify_owns_execution(&state, &agent.name, &req.execution_id).await?;

    budget::release(
        &state.pool,
        state.webhooks.as_ref(),
        &agent.name,
        &req.execution_id,
        req.estimated_micro,
        &req.reason,
        req.status_code,
    )
    .await
    .map_err(HttpError::from)?;

    r2e_prometheus::record_settlement_released(&agent.name, &req.reason);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct CreateWebhookSubscriptionRequest {
    pub url: String,
    pub event_types: Vec<String>,
}

#[derive(Serialize, sqlx::FromRow)]
pub struct WebhookSubscriptionRow {
    id: i64,
    tenant_id: String,
    url: String,
    event_types: Value,
}

/// `POST /api/v2/webhooks/subscriptions` — register a delivery target
/// for this agent's tenant. Delivery itself still only writes a
/// bookkeeping row (see [`crate::webhook::LoggingWebhookSink`]); the
/// actual HTTP fan-out is an external adapter.
pub async fn create_webhook_subscription(
    State(state): State<AppState>,
    AuthenticatedAgent { agent, .. }: AuthenticatedAgent,
    Json(req): Json<CreateWebhookSubscriptionRequest>,
) -> Result<(StatusCode, Json<WebhookSubscriptionRow>), HttpError> {
    if req.url.trim().is_empty() {
        return Err(HttpError::BadRequest("url must not be empty".to_string()));
    }
    if req.event_types.is_empty() {
        return Err(HttpError::BadRequest("event_types must not be empty".to_string()));
    }

    let event_types = serde_json::to_value(&req.event_types).expect("Vec<String> always serializes");
    let row = sqlx::query_as::<_, WebhookSubscriptionRow>(
        "INSERT INTO webhook_subscriptions (tenant_id, url, event_types)
         VALUES ($1, $2, $3)
         RETURNING id, tenant_id, url, event_types",
    )
    .bind(&agent.tenant_id)
    .bind(&req.url)
    .bind(&event_types)
    .fetch_one(&state.pool)
    .await
    .map_err(|err| HttpError::Internal(err.to_string()))?;

    Ok((StatusCode::CREATED, Json(row)))
}

/// `GET /api/v2/webhooks/subscriptions` — list subscriptions scoped to
/// the caller's tenant.
pub async fn list_webhook_subscriptions(
    State(state): State<AppState>,
    AuthenticatedAgent { agent, .. }: AuthenticatedAgent,
) -> Result<Json<Vec<WebhookSubscriptionRow>>, HttpError> {
    let rows = sqlx::query_as::<_, WebhookSubscriptionRow>(
        "SELECT id, tenant_id, url, event_types FROM webhook_subscriptions
         WHERE tenant_id = $1 ORDER BY id",
    )
    .bind(&agent.tenant_id)
    .fetch_all(&state.pool)
    .await
    .map_err(|err| HttpError::Internal(err.to_string()))?;

    Ok(Json(rows))
}
