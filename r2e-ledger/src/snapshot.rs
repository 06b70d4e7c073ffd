//! Tagged schema snapshot/rollback (SPEC_FULL §6): copy every ledger table
//! into a parallel schema named after an operator-supplied tag, and
//! restore from one later. Grounded on the same transaction-per-call
//! discipline as the rest of this crate — the copy or restore either
//! lands in full or not at all.

use sqlx::PgPool;

use crate::error::LedgerError;

/// Every table the ledger owns, parent-first so a rollback's `INSERT`
/// pass never violates a foreign key before its referent is restored.
const LEDGER_TABLES: &[&str] = &[
    "agents",
    "executions",
    "reservations",
    "event_log",
    "rate_windows",
    "quota_limits",
    "budgets",
    "webhook_subscriptions",
    "webhook_deliveries",
    "tool_plugins",
];

/// Report of a snapshot create/rollback: the tag, the schema it lives in,
/// and a per-table row count for the operator to sanity-check against.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SnapshotReport {
    pub tag: String,
    pub schema: String,
    pub tables: Vec<(String, i64)>,
}

/// Schema names can't be bound as query parameters, so this is the only
/// thing standing between an operator-supplied tag and a `CREATE SCHEMA`
/// injection. Restricted to the identifier characters Postgres accepts
/// unquoted.
fn sanitize_tag(tag: &str) -> Result<String, LedgerError> {
    if tag.is_empty() || tag.len() > 48 {
        return Err(LedgerError::InvalidSnapshotTag("tag must be 1-48 characters".to_string()));
    }
    if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(LedgerError::InvalidSnapshotTag(
            "tag may only contain ASCII letters, digits, and underscores".to_string(),
        ));
    }
    if tag.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(LedgerError::InvalidSnapshotTag("tag must not start with a digit".to_string()));
    }
    Ok(tag.to_ascii_lowercase())
}

fn schema_name(tag: &str) -> String {
    format!("aex_snapshot_{tag}")
}

/// Copy every ledger table into `aex_snapshot_<tag>`, replacing any prior
/// snapshot under the same tag.
pub async fn create_snapshot(pool: &PgPool, tag: &str) -> Result<SnapshotReport, LedgerError> {
    let tag = sanitize_tag(tag)?;
    let schema = schema_name(&tag);
    let mut tx = pool.begin().await?;

    sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE")).execute(&mut *tx).await?;
    sqlx::query(&format!("CREATE SCHEMA {schema}")).execute(&mut *tx).await?;

    let mut tables = Vec::with_capacity(LEDGER_TABLES.len());
    for table in LEDGER_TABLES {
        sqlx::query(&format!("CREATE TABLE {schema}.{table} AS TABLE public.{table}"))
            .execute(&mut *tx)
            .await?;
        let count: i64 = sqlx::query_scalar(&format!("SELECT count(*) FROM {schema}.{table}"))
            .fetch_one(&mut *tx)
            .await?;
        tables.push(((*table).to_string(), count));
    }

    tx.commit().await?;
    Ok(SnapshotReport { tag, schema, tables })
}

/// Restore every ledger table from a previously-created snapshot,
/// replacing current contents. The whole ledger is truncated and
/// reloaded inside one transaction, so a crash mid-restore leaves the
/// pre-rollback state intact rather than a half-restored ledger.
pub async fn rollback_snapshot(pool: &PgPool, tag: &str) -> Result<SnapshotReport, LedgerError> {
    let tag = sanitize_tag(tag)?;
    let schema = schema_name(&tag);
    let mut tx = pool.begin().await?;

    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
    )
    .bind(&schema)
    .fetch_one(&mut *tx)
    .await?;
    if !exists {
        return Err(LedgerError::SnapshotNotFound(tag));
    }

    let qualified = LEDGER_TABLES.iter().map(|t| format!("public.{t}")).collect::<Vec<_>>().join(", ");
    sqlx::query(&format!("TRUNCATE TABLE {qualified} CASCADE")).execute(&mut *tx).await?;

    let mut tables = Vec::with_capacity(LEDGER_TABLES.len());
    for table in LEDGER_TABLES {
        sqlx::query(&format!("INSERT INTO public.{table} SELECT * FROM {schema}.{table}"))
            .execute(&mut *tx)
            .await?;
        let count: i64 = sqlx::query_scalar(&format!("SELECT count(*) FROM public.{table}"))
            .fetch_one(&mut *tx)
            .await?;
        tables.push(((*table).to_string(), count));
    }

    tx.commit().await?;
    Ok(SnapshotReport { tag, schema, tables })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_tag_rejects_non_identifier_chars() {
        assert!(sanitize_tag("pre-release").is_err());
        assert!(sanitize_tag("drop table; --").is_err());
        assert!(sanitize_tag("").is_err());
    }

    #[test]
    fn sanitize_tag_rejects_leading_digit() {
        assert!(sanitize_tag("2024_cutover").is_err());
    }

    #[test]
    fn sanitize_tag_accepts_plain_identifier() {
        assert_eq!(sanitize_tag("Pre_Migration_42").unwrap(), "pre_migration_42");
    }

    #[test]
    fn schema_name_is_prefixed() {
        assert_eq!(schema_name("nightly"), "aex_snapshot_nightly");
    }
}
