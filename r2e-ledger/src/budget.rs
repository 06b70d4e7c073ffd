//! Reservation/commit/release state machine and the idempotency cache
//! backing it. Every function here opens and commits (or rolls back) its
//! own transaction — callers never interleave ledger writes with other
//! statements on the same connection.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::LedgerError;
use crate::events::append_hash_event;
use crate::types::{
    AgentLedgerRow, CachedExecutionResult, ExecutionRow, ExecutionState, ReservationDecision,
    Scope, DEFAULT_PROJECT_ID, DEFAULT_TENANT_ID,
};
use crate::webhook::WebhookSink;

fn now() -> DateTime<Utc> {
    Utc::now()
}

fn json_or_none(value: Option<Value>) -> Option<Value> {
    value
}

/// Look up a terminal (or in-flight) execution for idempotent replay,
/// independent of any reservation. Used by the admission layer before it
/// even computes a cost estimate.
pub async fn get_execution_cache(
    pool: &PgPool,
    execution_id: &str,
) -> Result<Option<CachedExecutionResult>, LedgerError> {
    let row = sqlx::query_as::<_, ExecutionRow>(
        "SELECT state, status_code, response_body, error_body, request_hash, agent, tenant_id, project_id
         FROM executions WHERE execution_id = $1",
    )
    .bind(execution_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| CachedExecutionResult {
        state: r.state.parse().unwrap_or(ExecutionState::Failed),
        status_code: r.status_code,
        response_body: json_or_none(r.response_body),
        error_body: json_or_none(r.error_body),
        request_hash: r.request_hash,
    }))
}

/// Materialize the agent's budget/rate counters into the normalized
/// `budgets`/`quota_limits` tables, used by the admin/reporting surface
/// instead of re-joining `agents` on every read.
async fn sync_agent_budget_scope(
    tx: &mut Transaction<'_, Postgres>,
    agent: &str,
    tenant_id: &str,
    project_id: &str,
) -> Result<(), sqlx::Error> {
    let row = sqlx::query_as::<_, (i64, i64, i64, i64, Option<i64>)>(
        "SELECT budget_micro, spent_micro, reserved_micro, rpm_limit, max_tokens_per_minute
         FROM agents WHERE name = $1",
    )
    .bind(agent)
    .fetch_optional(&mut **tx)
    .await?;

    let Some((budget_micro, spent_micro, reserved_micro, rpm_limit, tpm_limit)) = row else {
        return Ok(());
    };

    let budget_key = format!("agent:{tenant_id}:{project_id}:{agent}");
    sqlx::query(
        "INSERT INTO budgets (
            budget_key, tenant_id, project_id, agent, scope_type, period,
            limit_micro, spent_micro, reserved_micro
         ) VALUES ($1, $2, $3, $4, 'AGENT', 'TOTAL', $5, $6, $7)
         ON CONFLICT (budget_key) DO UPDATE SET
            limit_micro = excluded.limit_micro,
            spent_micro = excluded.spent_micro,
            reserved_micro = excluded.reserved_micro,
            version = budgets.version + 1",
    )
    .bind(&budget_key)
    .bind(tenant_id)
    .bind(project_id)
    .bind(agent)
    .bind(budget_micro)
    .bind(spent_micro)
    .bind(reserved_micro)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO quota_limits (scope_key, tenant_id, project_id, agent, rpm_limit, tpm_limit)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (scope_key) DO UPDATE SET
            rpm_limit = excluded.rpm_limit,
            tpm_limit = excluded.tpm_limit,
            updated_at = now()",
    )
    .bind(&budget_key)
    .bind(tenant_id)
    .bind(project_id)
    .bind(agent)
    .bind(rpm_limit)
    .bind(tpm_limit)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Reserve budget for `execution_id` in a single transaction. Exactly one
/// outcome is returned: a fresh reservation, a reused terminal/in-flight
/// result (idempotent replay), or a denial mapped to
/// [`LedgerError::InsufficientBudget`].
#[allow(clippy::too_many_arguments)]
pub async fn reserve(
    pool: &PgPool,
    webhooks: &dyn WebhookSink,
    agent: &str,
    tenant_id: Option<&str>,
    project_id: Option<&str>,
    execution_id: &str,
    endpoint: &str,
    request_hash: &str,
    estimated_cost_micro: i64,
    policy_hash: Option<&str>,
    route_hash: Option<&str>,
    reservation_ttl_seconds: i64,
) -> Result<ReservationDecision, LedgerError> {
    let expiry = now() + Duration::seconds(reservation_ttl_seconds);
    let mut tx = pool.begin().await?;

    let agent_row = sqlx::query_as::<_, AgentLedgerRow>(
        "SELECT budget_micro, spent_micro, reserved_micro, lifecycle_state,
                COALESCE(NULLIF(tenant_id, ''), $1) AS tenant_id,
                COALESCE(NULLIF(project_id, ''), $2) AS project_id
         FROM agents WHERE name = $3
         FOR UPDATE",
    )
    .bind(DEFAULT_TENANT_ID)
    .bind(DEFAULT_PROJECT_ID)
    .bind(agent)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| LedgerError::AgentNotFound(agent.to_string()))?;

    let scope = Scope::resolve(Some(&agent_row.tenant_id), Some(&agent_row.project_id));
    if let Some(requested) = tenant_id.map(str::trim).filter(|s| !s.is_empty()) {
        if requested != scope.tenant_id {
            return Err(LedgerError::TenantMismatch);
        }
    }
    if let Some(requested) = project_id.map(str::trim).filter(|s| !s.is_empty()) {
        if requested != scope.project_id {
            return Err(LedgerError::ProjectMismatch);
        }
    }

    if agent_row.lifecycle_state != "READY" {
        return Err(LedgerError::AgentLocked(agent_row.lifecycle_state));
    }

    let existing = sqlx::query_as::<_, ExecutionRow>(
        "SELECT state, status_code, response_body, error_body, request_hash, agent, tenant_id, project_id
         FROM executions WHERE execution_id = $1",
    )
    .bind(execution_id)
    .fetch_optional(&mut *tx)
    .await?;

    let existing_reservation = sqlx::query_as::<_, (String, i64)>(
        "SELECT state, estimated_micro FROM reservations WHERE execution_id = $1",
    )
    .bind(execution_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = &existing {
        if let Some(existing_hash) = &row.request_hash {
            if existing_hash != request_hash {
                return Err(LedgerError::IdempotencyConflict);
            }
        }
    }

    if let Some(row) = &existing {
        let state: ExecutionState = row.state.parse().unwrap_or(ExecutionState::Failed);
        if state.is_terminal() {
            tx.commit().await?;
            return Ok(ReservationDecision {
                execution_id: execution_id.to_string(),
                reserved: false,
                estimated_micro: estimated_cost_micro,
                reused: true,
                state: Some(state),
                status_code: row.status_code,
                response_body: row.response_body.clone(),
                error_body: row.error_body.clone(),
            });
        }
    }

    if let Some((state, estimated_micro)) = &existing_reservation {
        if state == "RESERVED" {
            tx.commit().await?;
            return Ok(ReservationDecision {
                execution_id: execution_id.to_string(),
                reserved: false,
                estimated_micro: *estimated_micro,
                reused: true,
                state: Some(ExecutionState::Reserved),
                status_code: None,
                response_body: None,
                error_body: None,
            });
        }
    }

    if existing.is_none() {
        sqlx::query(
            "INSERT INTO executions (
                execution_id, tenant_id, project_id, agent, endpoint,
                request_hash, policy_hash, route_hash, state, created_at, updated_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now())",
        )
        .bind(execution_id)
        .bind(&scope.tenant_id)
        .bind(&scope.project_id)
        .bind(agent)
        .bind(endpoint)
        .bind(request_hash)
        .bind(policy_hash)
        .bind(route_hash)
        .bind(ExecutionState::Reserving.as_str())
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query(
            "UPDATE executions
             SET tenant_id = $1, project_id = $2, endpoint = $3, request_hash = $4,
                 policy_hash = $5, route_hash = $6, updated_at = now()
             WHERE execution_id = $7",
        )
        .bind(&scope.tenant_id)
        .bind(&scope.project_id)
        .bind(endpoint)
        .bind(request_hash)
        .bind(policy_hash)
        .bind(route_hash)
        .bind(execution_id)
        .execute(&mut *tx)
        .await?;
    }

    let remaining = agent_row.budget_micro - agent_row.spent_micro - agent_row.reserved_micro;
    if estimated_cost_micro > remaining {
        let error_payload = json!({
            "detail": "Insufficient budget",
            "estimated_micro": estimated_cost_micro,
            "remaining_micro": remaining,
        });
        sqlx::query(
            "UPDATE executions
             SET state = $1, status_code = 402, error_body = $2, updated_at = now(), terminal_at = now()
             WHERE execution_id = $3",
        )
        .bind(ExecutionState::Denied.as_str())
        .bind(&error_payload)
        .bind(execution_id)
        .execute(&mut *tx)
        .await?;

        append_hash_event(
            &mut tx,
            Some(execution_id),
            Some(agent),
            &scope.tenant_id,
            &scope.project_id,
            "budget.deny",
            &error_payload,
        )
        .await?;
        sync_agent_budget_scope(&mut tx, agent, &scope.tenant_id, &scope.project_id).await?;
        tx.commit().await?;

        let mut payload = error_payload.clone();
        if let Value::Object(ref mut map) = payload {
            map.insert("agent".into(), json!(agent));
            map.insert("endpoint".into(), json!(endpoint));
        }
        webhooks
            .dispatch(&scope.tenant_id, "execution.denied", execution_id, payload)
            .await;

        return Err(LedgerError::InsufficientBudget {
            estimated_micro: estimated_cost_micro,
            remaining_micro: remaining,
        });
    }

    let reservation_insert = sqlx::query(
        "INSERT INTO reservations (
            execution_id, tenant_id, project_id, agent, estimated_micro,
            actual_micro, state, reserved_at, expiry_at
         ) VALUES ($1, $2, $3, $4, $5, 0, 'RESERVED', now(), $6)
         ON CONFLICT (execution_id) DO NOTHING",
    )
    .bind(execution_id)
    .bind(&scope.tenant_id)
    .bind(&scope.project_id)
    .bind(agent)
    .bind(estimated_cost_micro)
    .bind(expiry)
    .execute(&mut *tx)
    .await?;

    if reservation_insert.rows_affected() == 0 {
        tx.commit().await?;
        return Ok(ReservationDecision {
            execution_id: execution_id.to_string(),
            reserved: false,
            estimated_micro: estimated_cost_micro,
            reused: true,
            state: Some(ExecutionState::Reserved),
            status_code: None,
            response_body: None,
            error_body: None,
        });
    }

    sqlx::query("UPDATE agents SET reserved_micro = reserved_micro + $1 WHERE name = $2")
        .bind(estimated_cost_micro)
        .bind(agent)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE executions SET state = $1, updated_at = now() WHERE execution_id = $2")
        .bind(ExecutionState::Reserved.as_str())
        .bind(execution_id)
        .execute(&mut *tx)
        .await?;

    append_hash_event(
        &mut tx,
        Some(execution_id),
        Some(agent),
        &scope.tenant_id,
        &scope.project_id,
        "budget.reserve",
        &json!({"estimated_micro": estimated_cost_micro, "expiry_at": expiry}),
    )
    .await?;
    sync_agent_budget_scope(&mut tx, agent, &scope.tenant_id, &scope.project_id).await?;
    tx.commit().await?;

    webhooks
        .dispatch(
            &scope.tenant_id,
            "budget.reserved",
            execution_id,
            json!({
                "agent": agent,
                "execution_id": execution_id,
                "estimated_micro": estimated_cost_micro,
                "expiry_at": expiry,
            }),
        )
        .await;

    Ok(ReservationDecision {
        execution_id: execution_id.to_string(),
        reserved: true,
        estimated_micro: estimated_cost_micro,
        reused: false,
        state: None,
        status_code: None,
        response_body: None,
        error_body: None,
    })
}

/// Mark an execution as dispatched to the upstream provider. A no-op once
/// the execution has already reached a terminal state.
pub async fn mark_dispatched(pool: &PgPool, execution_id: &str) -> Result<(), LedgerError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, (String, String, String, String)>(
        "SELECT state, agent,
                COALESCE(NULLIF(tenant_id, ''), $1) AS tenant_id,
                COALESCE(NULLIF(project_id, ''), $2) AS project_id
         FROM executions WHERE execution_id = $3",
    )
    .bind(DEFAULT_TENANT_ID)
    .bind(DEFAULT_PROJECT_ID)
    .bind(execution_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((state, agent, tenant_id, project_id)) = row else {
        return Ok(());
    };
    let state: ExecutionState = state.parse().unwrap_or(ExecutionState::Failed);
    if state.is_terminal() {
        tx.commit().await?;
        return Ok(());
    }

    sqlx::query("UPDATE executions SET state = $1, updated_at = now() WHERE execution_id = $2")
        .bind(ExecutionState::Dispatched.as_str())
        .bind(execution_id)
        .execute(&mut *tx)
        .await?;

    append_hash_event(
        &mut tx,
        Some(execution_id),
        Some(&agent),
        &tenant_id,
        &project_id,
        "execution.dispatched",
        &json!({"state": ExecutionState::Dispatched.as_str()}),
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Settle usage exactly once, via CAS on the reservation row. Returns
/// `Ok(())` both when it performs the settlement and when it discovers the
/// execution was already committed by a concurrent caller.
#[allow(clippy::too_many_arguments)]
pub async fn commit(
    pool: &PgPool,
    webhooks: &dyn WebhookSink,
    agent: &str,
    execution_id: &str,
    estimated_cost_micro: i64,
    actual_cost_micro: i64,
    prompt_tokens: i64,
    completion_tokens: i64,
    model_name: Option<&str>,
    response_body: Option<Value>,
    status_code: i32,
) -> Result<(), LedgerError> {
    let mut tx = pool.begin().await?;

    let execution_row = sqlx::query_as::<_, (String, String, String)>(
        "SELECT state,
                COALESCE(NULLIF(tenant_id, ''), $1) AS tenant_id,
                COALESCE(NULLIF(project_id, ''), $2) AS project_id
         FROM executions WHERE execution_id = $3",
    )
    .bind(DEFAULT_TENANT_ID)
    .bind(DEFAULT_PROJECT_ID)
    .bind(execution_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| LedgerError::ExecutionMissing(execution_id.to_string()))?;

    let (state, tenant_scope, project_scope) = execution_row;
    if state == ExecutionState::Committed.as_str() {
        tx.commit().await?;
        return Ok(());
    }

    let cas = sqlx::query(
        "UPDATE reservations SET state = 'COMMITTED', actual_micro = $1, settled_at = now()
         WHERE execution_id = $2 AND state = 'RESERVED'",
    )
    .bind(actual_cost_micro)
    .bind(execution_id)
    .execute(&mut *tx)
    .await?;

    if cas.rows_affected() == 0 {
        let existing_state: Option<String> =
            sqlx::query_scalar("SELECT state FROM reservations WHERE execution_id = $1")
                .bind(execution_id)
                .fetch_optional(&mut *tx)
                .await?;
        if existing_state.as_deref() == Some("COMMITTED") {
            tx.commit().await?;
            return Ok(());
        }
        return Err(LedgerError::CasConflict);
    }

    sqlx::query(
        "UPDATE agents
         SET reserved_micro = GREATEST(0, reserved_micro - $1),
             spent_micro = spent_micro + $2,
             tokens_used_prompt = tokens_used_prompt + $3,
             tokens_used_completion = tokens_used_completion + $4,
             last_activity = now()
         WHERE name = $5",
    )
    .bind(estimated_cost_micro)
    .bind(actual_cost_micro)
    .bind(prompt_tokens)
    .bind(completion_tokens)
    .bind(agent)
    .execute(&mut *tx)
    .await?;

    let total_tokens = prompt_tokens + completion_tokens;
    if total_tokens > 0 {
        sqlx::query(
            "UPDATE rate_windows
             SET tokens_count = tokens_count + $1,
                 tenant_id = COALESCE(NULLIF(tenant_id, ''), $2),
                 project_id = COALESCE(NULLIF(project_id, ''), $3)
             WHERE agent = $4",
        )
        .bind(total_tokens)
        .bind(&tenant_scope)
        .bind(&project_scope)
        .bind(agent)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        "UPDATE executions
         SET state = $1, status_code = $2, response_body = $3, error_body = NULL,
             updated_at = now(), terminal_at = now()
         WHERE execution_id = $4",
    )
    .bind(ExecutionState::Committed.as_str())
    .bind(status_code)
    .bind(&response_body)
    .bind(execution_id)
    .execute(&mut *tx)
    .await?;

    let payload = json!({
        "cost_micro": actual_cost_micro,
        "estimated_micro": estimated_cost_micro,
        "prompt_tokens": prompt_tokens,
        "completion_tokens": completion_tokens,
        "model": model_name,
    });
    append_hash_event(
        &mut tx,
        Some(execution_id),
        Some(agent),
        &tenant_scope,
        &project_scope,
        "usage.commit",
        &payload,
    )
    .await?;
    sync_agent_budget_scope(&mut tx, agent, &tenant_scope, &project_scope).await?;
    tx.commit().await?;

    webhooks
        .dispatch(
            &tenant_scope,
            "budget.committed",
            execution_id,
            json!({
                "agent": agent,
                "estimated_micro": estimated_cost_micro,
                "actual_micro": actual_cost_micro,
                "prompt_tokens": prompt_tokens,
                "completion_tokens": completion_tokens,
                "model": model_name,
            }),
        )
        .await;

    Ok(())
}

/// Release a reservation for a failed dispatch path. Idempotent: calling
/// this twice (or after a commit already landed) is a no-op.
pub async fn release(
    pool: &PgPool,
    webhooks: &dyn WebhookSink,
    agent: &str,
    execution_id: &str,
    estimated_cost_micro: i64,
    reason: &str,
    status_code: Option<i32>,
) -> Result<(), LedgerError> {
    let status = status_code.unwrap_or(502);
    let mut tx = pool.begin().await?;

    let execution_row = sqlx::query_as::<_, (String, String, String)>(
        "SELECT state,
                COALESCE(NULLIF(tenant_id, ''), $1) AS tenant_id,
                COALESCE(NULLIF(project_id, ''), $2) AS project_id
         FROM executions WHERE execution_id = $3",
    )
    .bind(DEFAULT_TENANT_ID)
    .bind(DEFAULT_PROJECT_ID)
    .bind(execution_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((state, tenant_scope, project_scope)) = execution_row else {
        return Ok(());
    };

    if state == ExecutionState::Committed.as_str() || state == ExecutionState::Released.as_str() {
        tx.commit().await?;
        return Ok(());
    }

    let cas = sqlx::query(
        "UPDATE reservations SET state = 'RELEASED', settled_at = now()
         WHERE execution_id = $1 AND state = 'RESERVED'",
    )
    .bind(execution_id)
    .execute(&mut *tx)
    .await?;

    if cas.rows_affected() > 0 {
        sqlx::query("UPDATE agents SET reserved_micro = GREATEST(0, reserved_micro - $1) WHERE name = $2")
            .bind(estimated_cost_micro)
            .bind(agent)
            .execute(&mut *tx)
            .await?;
    }

    let error_payload = json!({"detail": reason});
    sqlx::query(
        "UPDATE executions
         SET state = $1, status_code = $2, error_body = $3, updated_at = now(), terminal_at = now()
         WHERE execution_id = $4",
    )
    .bind(ExecutionState::Released.as_str())
    .bind(status)
    .bind(&error_payload)
    .bind(execution_id)
    .execute(&mut *tx)
    .await?;

    append_hash_event(
        &mut tx,
        Some(execution_id),
        Some(agent),
        &tenant_scope,
        &project_scope,
        "reservation.release",
        &json!({"reason": reason, "estimated_micro": estimated_cost_micro}),
    )
    .await?;
    sync_agent_budget_scope(&mut tx, agent, &tenant_scope, &project_scope).await?;
    tx.commit().await?;

    webhooks
        .dispatch(
            &tenant_scope,
            "budget.released",
            execution_id,
            json!({
                "agent": agent,
                "reason": reason,
                "estimated_micro": estimated_cost_micro,
                "status_code": status,
            }),
        )
        .await;

    Ok(())
}

/// Transition an execution straight to `FAILED` when no reservation exists
/// to release (e.g. it never made it past `RESERVING`).
pub async fn mark_failed(
    pool: &PgPool,
    webhooks: &dyn WebhookSink,
    execution_id: &str,
    reason: &str,
    status_code: i32,
) -> Result<(), LedgerError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, (String, String, String, String)>(
        "SELECT agent, state,
                COALESCE(NULLIF(tenant_id, ''), $1) AS tenant_id,
                COALESCE(NULLIF(project_id, ''), $2) AS project_id
         FROM executions WHERE execution_id = $3",
    )
    .bind(DEFAULT_TENANT_ID)
    .bind(DEFAULT_PROJECT_ID)
    .bind(execution_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((agent, state, tenant_scope, project_scope)) = row else {
        tx.commit().await?;
        return Ok(());
    };
    let parsed_state: ExecutionState = state.parse().unwrap_or(ExecutionState::Failed);
    if parsed_state.is_terminal() {
        tx.commit().await?;
        return Ok(());
    }

    let payload = json!({"detail": reason});
    sqlx::query(
        "UPDATE executions
         SET state = $1, status_code = $2, error_body = $3, updated_at = now(), terminal_at = now()
         WHERE execution_id = $4",
    )
    .bind(ExecutionState::Failed.as_str())
    .bind(status_code)
    .bind(&payload)
    .bind(execution_id)
    .execute(&mut *tx)
    .await?;

    append_hash_event(
        &mut tx,
        Some(execution_id),
        Some(&agent),
        &tenant_scope,
        &project_scope,
        "execution.failed",
        &json!({"reason": reason, "status_code": status_code}),
    )
    .await?;
    tx.commit().await?;

    webhooks
        .dispatch(
            &tenant_scope,
            "execution.failed",
            execution_id,
            json!({"reason": reason, "status_code": status_code}),
        )
        .await;

    Ok(())
}
