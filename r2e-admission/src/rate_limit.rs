//! Per-(tenant, project, agent) RPM/TPM windows. An optional fast
//! in-memory backend short-circuits the common allow path; the relational
//! `rate_windows` row stays the system of record either way, since the
//! ledger's `commit` step increments its token counter directly.

use chrono::{DateTime, Duration, Utc};
use r2e_ledger::events::append_hash_event;
use r2e_rate_limit::RateLimitRegistry;
use serde_json::json;
use sqlx::PgPool;

use crate::error::AdmissionError;

struct ResolvedLimits {
    rpm_limit: i64,
    tpm_limit: Option<i64>,
}

async fn resolve_limits(
    pool: &PgPool,
    agent: &str,
    tenant_id: &str,
    project_id: &str,
) -> Result<ResolvedLimits, AdmissionError> {
    let agent_row = sqlx::query_as::<_, (i64, Option<i64>)>(
        "SELECT rpm_limit, max_tokens_per_minute FROM agents WHERE name = $1",
    )
    .bind(agent)
    .fetch_optional(pool)
    .await
    .map_err(AdmissionError::Db)?
    .ok_or_else(|| AdmissionError::AgentNotFound(agent.to_string()))?;

    let mut limits = ResolvedLimits {
        rpm_limit: agent_row.0,
        tpm_limit: agent_row.1,
    };

    let scope_key = format!("agent:{tenant_id}:{project_id}:{agent}");
    let quota_row = sqlx::query_as::<_, (Option<i64>, Option<i64>)>(
        "SELECT rpm_limit, tpm_limit FROM quota_limits WHERE scope_key = $1",
    )
    .bind(&scope_key)
    .fetch_optional(pool)
    .await
    .map_err(AdmissionError::Db)?;

    if let Some((rpm_override, tpm_override)) = quota_row {
        if let Some(rpm) = rpm_override {
            limits.rpm_limit = rpm;
        }
        if tpm_override.is_some() {
            limits.tpm_limit = tpm_override;
        }
    }

    Ok(limits)
}

/// Check (and update) the current-minute rate window for `agent`. Returns
/// [`AdmissionError::RateLimited`] on breach, after persisting a
/// `rate.limit` event for audit.
pub async fn check_rate_limit(
    pool: &PgPool,
    fast: Option<&RateLimitRegistry>,
    agent: &str,
    tenant_id: &str,
    project_id: &str,
) -> Result<(), AdmissionError> {
    let limits = resolve_limits(pool, agent, tenant_id, project_id).await?;

    if let Some(registry) = fast {
        let key = format!("rpm:{tenant_id}:{project_id}:{agent}");
        if limits.rpm_limit > 0 && !registry.try_acquire(&key, limits.rpm_limit as u64, 60) {
            record_breach(pool, agent, tenant_id, project_id, "RPM", limits.rpm_limit).await?;
            return Err(AdmissionError::RateLimited("RPM rate limit exceeded".to_string()));
        }
    }

    let mut tx = pool.begin().await.map_err(AdmissionError::Db)?;

    let window = sqlx::query_as::<_, (DateTime<Utc>, i64, i64)>(
        "SELECT window_start, request_count, tokens_count FROM rate_windows WHERE agent = $1 FOR UPDATE",
    )
    .bind(agent)
    .fetch_optional(&mut *tx)
    .await
    .map_err(AdmissionError::Db)?;

    let now = Utc::now();
    match window {
        None => {
            sqlx::query(
                "INSERT INTO rate_windows (agent, tenant_id, project_id, window_start, request_count, tokens_count)
                 VALUES ($1, $2, $3, $4, 1, 0)",
            )
            .bind(agent)
            .bind(tenant_id)
            .bind(project_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(AdmissionError::Db)?;
        }
        Some((window_start, _, _)) if now - window_start > Duration::minutes(1) => {
            sqlx::query(
                "UPDATE rate_windows
                 SET tenant_id = $1, project_id = $2, window_start = $3, request_count = 1, tokens_count = 0
                 WHERE agent = $4",
            )
            .bind(tenant_id)
            .bind(project_id)
            .bind(now)
            .bind(agent)
            .execute(&mut *tx)
            .await
            .map_err(AdmissionError::Db)?;
        }
        Some((_, request_count, tokens_count)) => {
            if request_count >= limits.rpm_limit {
                record_breach_tx(&mut tx, agent, tenant_id, project_id, "RPM", limits.rpm_limit).await?;
                tx.commit().await.map_err(AdmissionError::Db)?;
                return Err(AdmissionError::RateLimited("RPM rate limit exceeded".to_string()));
            }
            if let Some(tpm) = limits.tpm_limit {
                if tokens_count >= tpm {
                    record_breach_tx(&mut tx, agent, tenant_id, project_id, "TPM", tpm).await?;
                    tx.commit().await.map_err(AdmissionError::Db)?;
                    return Err(AdmissionError::RateLimited("TPM rate limit exceeded".to_string()));
                }
            }
            sqlx::query(
                "UPDATE rate_windows SET tenant_id = $1, project_id = $2, request_count = request_count + 1
                 WHERE agent = $3",
            )
            .bind(tenant_id)
            .bind(project_id)
            .bind(agent)
            .execute(&mut *tx)
            .await
            .map_err(AdmissionError::Db)?;
        }
    }

    tx.commit().await.map_err(AdmissionError::Db)?;
    Ok(())
}

async fn record_breach(
    pool: &PgPool,
    agent: &str,
    tenant_id: &str,
    project_id: &str,
    kind: &str,
    limit: i64,
) -> Result<(), AdmissionError> {
    let mut tx = pool.begin().await.map_err(AdmissionError::Db)?;
    record_breach_tx(&mut tx, agent, tenant_id, project_id, kind, limit).await?;
    tx.commit().await.map_err(AdmissionError::Db)?;
    Ok(())
}

async fn record_breach_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    agent: &str,
    tenant_id: &str,
    project_id: &str,
    kind: &str,
    limit: i64,
) -> Result<(), AdmissionError> {
    tracing::warn!(agent, tenant_id, project_id, kind, limit, "rate limit exceeded");
    append_hash_event(
        tx,
        None,
        Some(agent),
        tenant_id,
        project_id,
        "rate.limit",
        &json!({"kind": kind, "limit": limit}),
    )
    .await
    .map_err(AdmissionError::Db)?;
    Ok(())
}
