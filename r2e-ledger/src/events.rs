use r2e_codec::{canonical_json_of, stable_hash_hex};
use serde::Serialize;
use sqlx::{Postgres, Transaction};

pub const GENESIS_HASH: &str = "GENESIS";

/// Append one row to the hash-chained event log.
///
/// Must be called inside an already-open transaction. Serializes
/// concurrent appends to the same `chain_partition` via
/// `pg_advisory_xact_lock`, which is automatically released at the end of
/// the caller's transaction.
pub async fn append_hash_event<P: Serialize>(
    tx: &mut Transaction<'_, Postgres>,
    execution_id: Option<&str>,
    agent: Option<&str>,
    tenant_id: &str,
    project_id: &str,
    event_type: &str,
    payload: &P,
) -> Result<(), sqlx::Error> {
    let payload_json = canonical_json_of(payload).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let tenant = non_empty(tenant_id, crate::types::DEFAULT_TENANT_ID);
    let project = non_empty(project_id, crate::types::DEFAULT_PROJECT_ID);
    let chain_partition = format!("tenant:{tenant}");

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(&chain_partition)
        .execute(&mut **tx)
        .await?;

    let prev_hash: String = sqlx::query_scalar(
        "SELECT event_hash FROM event_log WHERE chain_partition = $1 ORDER BY seq DESC LIMIT 1",
    )
    .bind(&chain_partition)
    .fetch_optional(&mut **tx)
    .await?
    .unwrap_or_else(|| GENESIS_HASH.to_string());

    let event_hash = stable_hash_hex([
        prev_hash.as_str(),
        event_type,
        execution_id.unwrap_or(""),
        payload_json.as_str(),
    ]);

    sqlx::query(
        "INSERT INTO event_log (
            tenant_id, project_id, chain_partition,
            execution_id, agent, event_type, payload_json, prev_hash, event_hash
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(tenant)
    .bind(project)
    .bind(&chain_partition)
    .bind(execution_id)
    .bind(agent)
    .bind(event_type)
    .bind(&payload_json)
    .bind(&prev_hash)
    .bind(&event_hash)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn non_empty<'a>(s: &'a str, default: &'a str) -> &'a str {
    let trimmed = s.trim();
    if trimmed.is_empty() { default } else { trimmed }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_hash_is_stable() {
        assert_eq!(GENESIS_HASH, "GENESIS");
    }
}
