//! `/admin/*` operator surface: ledger audit, burn-rate snapshot, recent
//! activity, dashboard aggregates, and a config hot-reload trigger. Every
//! route here (save `/ready`) sits behind [`crate::auth::AdminGuard`].

use axum::extract::State;
use axum::{http::StatusCode, Json};
use r2e_core::HttpError;
use r2e_ledger::{create_snapshot, rollback_snapshot};
use r2e_replay::run_full_audit;
use r2e_utils::{timed, LogLevel};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::AdminGuard;
use crate::state::AppState;

/// `GET /admin/replay` — run the full chain/balance/invariant audit and
/// return it verbatim. A clean ledger is a 200 with `is_clean: true`; a
/// dirty one is still a 200, since the audit itself succeeded — the
/// report body is what tells the operator something is wrong.
pub async fn replay(State(state): State<AppState>, _admin: AdminGuard) -> Result<Json<Value>, HttpError> {
    let report = timed(LogLevel::Info, "admin::replay", Some(500), run_full_audit(&state.pool))
        .await
        .map_err(|err| HttpError::Internal(err.to_string()))?;
    Ok(Json(json!({ "is_clean": report.is_clean(), "report": report })))
}

#[derive(Serialize)]
struct AgentAlertSnapshot {
    agent: String,
    tenant_id: String,
    budget_micro: i64,
    spent_micro: i64,
    reserved_micro: i64,
    remaining_micro: i64,
}

/// `GET /admin/alerts` — a point-in-time balance snapshot for every
/// agent. This is independent of [`crate::alerts::AlertService`]'s
/// rolling burn-rate sampler: it has no window to accumulate against, so
/// it reports remaining budget rather than a projected exhaustion time.
pub async fn alerts(State(state): State<AppState>, _admin: AdminGuard) -> Result<Json<Vec<AgentAlertSnapshot>>, HttpError> {
    let rows: Vec<(String, String, i64, i64, i64)> = sqlx::query_as(
        "SELECT name, tenant_id, budget_micro, spent_micro, reserved_micro FROM agents ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await
    .map_err(|err| HttpError::Internal(err.to_string()))?;

    let snapshots = rows
        .into_iter()
        .map(|(agent, tenant_id, budget_micro, spent_micro, reserved_micro)| AgentAlertSnapshot {
            remaining_micro: budget_micro - spent_micro - reserved_micro,
            agent,
            tenant_id,
            budget_micro,
            spent_micro,
            reserved_micro,
        })
        .collect();

    Ok(Json(snapshots))
}

#[derive(Serialize, sqlx::FromRow)]
struct ActivityRow {
    execution_id: String,
    agent: String,
    endpoint: String,
    state: String,
    status_code: Option<i32>,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// `GET /admin/activity` — the most recent executions across every
/// agent, newest first. Bounded to a fixed page size; this is an
/// operator tail, not a paginated listing endpoint.
const ACTIVITY_LIMIT: i64 = 100;

pub async fn activity(State(state): State<AppState>, _admin: AdminGuard) -> Result<Json<Vec<ActivityRow>>, HttpError> {
    let rows = sqlx::query_as::<_, ActivityRow>(
        "SELECT execution_id, agent, endpoint, state, status_code, created_at
         FROM executions ORDER BY created_at DESC LIMIT $1",
    )
    .bind(ACTIVITY_LIMIT)
    .fetch_all(&state.pool)
    .await
    .map_err(|err| HttpError::Internal(err.to_string()))?;

    Ok(Json(rows))
}

/// `GET /admin/dashboard/data` — aggregate counters for an operator
/// dashboard: agent count, open reservations, and executions by
/// terminal state.
pub async fn dashboard_data(State(state): State<AppState>, _admin: AdminGuard) -> Result<Json<Value>, HttpError> {
    let agent_count: i64 = sqlx::query_scalar("SELECT count(*) FROM agents")
        .fetch_one(&state.pool)
        .await
        .map_err(|err| HttpError::Internal(err.to_string()))?;

    let open_reservations: i64 = sqlx::query_scalar("SELECT count(*) FROM reservations WHERE state = 'RESERVED'")
        .fetch_one(&state.pool)
        .await
        .map_err(|err| HttpError::Internal(err.to_string()))?;

    let by_state: Vec<(String, i64)> = sqlx::query_as("SELECT state, count(*) FROM executions GROUP BY state")
        .fetch_all(&state.pool)
        .await
        .map_err(|err| HttpError::Internal(err.to_string()))?;

    let total_spent_micro: Option<i64> = sqlx::query_scalar("SELECT sum(spent_micro) FROM agents")
        .fetch_one(&state.pool)
        .await
        .map_err(|err| HttpError::Internal(err.to_string()))?;

    Ok(Json(json!({
        "agent_count": agent_count,
        "open_reservations": open_reservations,
        "executions_by_state": by_state.into_iter().collect::<std::collections::HashMap<_, _>>(),
        "total_spent_micro": total_spent_micro.unwrap_or(0),
    })))
}

/// `POST /admin/reload_config` — re-read the model/provider config file.
/// Atomic swap-on-success: a bad file leaves the previous config live and
/// this returns its parse error to the caller.
pub async fn reload_config(State(state): State<AppState>, _admin: AdminGuard) -> Result<StatusCode, HttpError> {
    state.router_config.reload().map_err(|err| HttpError::BadRequest(err.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct SnapshotRequest {
    pub tag: String,
}

/// `POST /admin/snapshot` — copy every ledger table into a parallel
/// schema tagged by the caller-supplied string, ahead of a risky
/// migration or bulk edit. Replaces any prior snapshot under the same
/// tag.
pub async fn snapshot(
    State(state): State<AppState>,
    _admin: AdminGuard,
    Json(req): Json<SnapshotRequest>,
) -> Result<Json<Value>, HttpError> {
    let report = create_snapshot(&state.pool, &req.tag).await.map_err(HttpError::from)?;
    Ok(Json(json!({ "tag": report.tag, "schema": report.schema, "tables": report.tables })))
}

/// `POST /admin/snapshot/rollback` — restore the ledger from a
/// previously-created tagged snapshot, replacing current contents.
pub async fn snapshot_rollback(
    State(state): State<AppState>,
    _admin: AdminGuard,
    Json(req): Json<SnapshotRequest>,
) -> Result<Json<Value>, HttpError> {
    let report = rollback_snapshot(&state.pool, &req.tag).await.map_err(HttpError::from)?;
    Ok(Json(json!({ "tag": report.tag, "schema": report.schema, "tables": report.tables })))
}

/// `GET /ready` — readiness probe: the DB must answer a trivial query
/// and the recovery sweep must have completed at least once, recently
/// enough to trust the ledger's recovered state.
const READY_SWEEP_STALENESS_SECONDS: i64 = 300;

pub async fn ready(State(state): State<AppState>) -> Result<Json<Value>, HttpError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .map_err(|err| HttpError::Internal(format!("database unreachable: {err}")))?;

    let last_sweep = *state.last_sweep.lock().expect("last_sweep lock poisoned");
    let sweep_age_seconds = last_sweep.map(|at| (chrono::Utc::now() - at).num_seconds());

    match sweep_age_seconds {
        Some(age) if age <= READY_SWEEP_STALENESS_SECONDS => {
            Ok(Json(json!({ "ready": true, "last_sweep_age_seconds": age })))
        }
        Some(age) => Err(HttpError::Custom {
            status: axum::http::StatusCode::SERVICE_UNAVAILABLE,
            body: json!({ "ready": false, "reason": "recovery sweep is stale", "last_sweep_age_seconds": age }),
        }),
        None => Err(HttpError::Custom {
            status: axum::http::StatusCode::SERVICE_UNAVAILABLE,
            body: json!({ "ready": false, "reason": "no recovery sweep has completed yet" }),
        }),
    }
}
