//! Verifies the append-only, hash-chained event log: every row's
//! `event_hash` must equal `stable_hash(prev_hash, event_type,
//! execution_id, payload_json)`, and every row's `prev_hash` must equal
//! the preceding row's `event_hash` within the same `chain_partition`
//! (one chain per tenant — see [`r2e_ledger::events::append_hash_event`]).

use r2e_codec::stable_hash_hex;
use r2e_ledger::events::GENESIS_HASH;
use sqlx::PgPool;

use crate::error::ReplayError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub chain_partition: String,
    pub seq: i64,
    pub execution_id: Option<String>,
    pub event_type: String,
    pub payload_json: String,
    pub prev_hash: String,
    pub event_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChainDeviation {
    pub partition: String,
    pub seq: i64,
    pub expected_hash: String,
    pub observed_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ChainVerification {
    pub rows_checked: u64,
    pub deviation: Option<ChainDeviation>,
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        self.deviation.is_none()
    }
}

/// Check one partition's rows, already ordered by ascending `seq`.
/// Stops at (and reports) the first deviation rather than continuing
/// past a broken link, since every hash after it is unverifiable.
pub fn verify_chain_rows(rows: &[EventRow]) -> ChainVerification {
    let mut expected_prev = GENESIS_HASH.to_string();
    let mut rows_checked = 0u64;

    for row in rows {
        rows_checked += 1;

        if row.prev_hash != expected_prev {
            return ChainVerification {
                rows_checked,
                deviation: Some(ChainDeviation {
                    partition: row.chain_partition.clone(),
                    seq: row.seq,
                    expected_hash: expected_prev,
                    observed_hash: row.prev_hash.clone(),
                }),
            };
        }

        let expected_hash = stable_hash_hex([
            row.prev_hash.as_str(),
            row.event_type.as_str(),
            row.execution_id.as_deref().unwrap_or(""),
            row.payload_json.as_str(),
        ]);

        if expected_hash != row.event_hash {
            return ChainVerification {
                rows_checked,
                deviation: Some(ChainDeviation {
                    partition: row.chain_partition.clone(),
                    seq: row.seq,
                    expected_hash,
                    observed_hash: row.event_hash.clone(),
                }),
            };
        }

        expected_prev = row.event_hash.clone();
    }

    ChainVerification { rows_checked, deviation: None }
}

/// Fetch every partition's rows ordered by `seq` and verify each
/// independently, short-circuiting on the first partition that deviates.
pub async fn verify_chain(pool: &PgPool) -> Result<ChainVerification, ReplayError> {
    let partitions: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT chain_partition FROM event_log ORDER BY chain_partition")
            .fetch_all(pool)
            .await?;

    let mut total_checked = 0u64;
    for partition in partitions {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT chain_partition, seq, execution_id, event_type, payload_json, prev_hash, event_hash
             FROM event_log WHERE chain_partition = $1 ORDER BY seq ASC",
        )
        .bind(&partition)
        .fetch_all(pool)
        .await?;

        let verification = verify_chain_rows(&rows);
        total_checked += verification.rows_checked;
        if !verification.is_valid() {
            return Ok(ChainVerification { rows_checked: total_checked, deviation: verification.deviation });
        }
    }

    Ok(ChainVerification { rows_checked: total_checked, deviation: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(partition: &str, seq: i64, prev: &str, event_type: &str, payload: &str, exec: Option<&str>) -> EventRow {
        let hash = stable_hash_hex([prev, event_type, exec.unwrap_or(""), payload]);
        EventRow {
            chain_partition: partition.to_string(),
            seq,
            execution_id: exec.map(str::to_string),
            event_type: event_type.to_string(),
            payload_json: payload.to_string(),
            prev_hash: prev.to_string(),
            event_hash: hash,
        }
    }

    #[test]
    fn valid_chain_of_three_passes() {
        let r1 = row("tenant:default", 1, GENESIS_HASH, "budget.reserve", "{\"a\":1}", Some("e1"));
        let r2 = row("tenant:default", 2, &r1.event_hash, "usage.commit", "{\"a\":2}", Some("e1"));
        let r3 = row("tenant:default", 3, &r2.event_hash, "budget.reserve", "{\"a\":3}", Some("e2"));
        let verification = verify_chain_rows(&[r1, r2, r3]);
        assert!(verification.is_valid());
        assert_eq!(verification.rows_checked, 3);
    }

    #[test]
    fn broken_link_is_reported_at_correct_seq() {
        let r1 = row("tenant:default", 1, GENESIS_HASH, "budget.reserve", "{\"a\":1}", Some("e1"));
        let mut r2 = row("tenant:default", 2, &r1.event_hash, "usage.commit", "{\"a\":2}", Some("e1"));
        r2.prev_hash = "tampered".to_string();
        let verification = verify_chain_rows(&[r1, r2]);
        assert!(!verification.is_valid());
        assert_eq!(verification.deviation.unwrap().seq, 2);
    }

    #[test]
    fn tampered_payload_is_caught_even_with_correct_prev_hash() {
        let r1 = row("tenant:default", 1, GENESIS_HASH, "budget.reserve", "{\"a\":1}", Some("e1"));
        let mut r2 = row("tenant:default", 2, &r1.event_hash, "usage.commit", "{\"a\":2}", Some("e1"));
        r2.payload_json = "{\"a\":999}".to_string();
        let verification = verify_chain_rows(&[r1, r2]);
        assert!(!verification.is_valid());
        let deviation = verification.deviation.unwrap();
        assert_eq!(deviation.seq, 2);
        assert_ne!(deviation.expected_hash, deviation.observed_hash);
    }

    #[test]
    fn empty_chain_is_valid() {
        assert!(verify_chain_rows(&[]).is_valid());
    }
}
