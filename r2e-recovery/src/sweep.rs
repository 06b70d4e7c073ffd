//! One reconciliation pass: releases reservations past their expiry and
//! fails executions that crashed before a reservation ever landed.

use r2e_ledger::{budget, WebhookSink};
use sqlx::PgPool;

use crate::error::RecoveryError;

/// Tally of one [`sweep_once`] pass, logged by the caller and surfaced on
/// the admin activity endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub released_expired_reservations: u64,
    pub failed_orphaned_reserving: u64,
    pub failed_orphaned_dispatched: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.released_expired_reservations + self.failed_orphaned_reserving + self.failed_orphaned_dispatched
    }
}

/// Run one sweep over every non-terminal execution. Idempotent: running
/// it twice with no new traffic in between finds nothing on the second
/// pass, since every row it touches is left in a terminal state.
pub async fn sweep_once(pool: &PgPool, webhooks: &dyn WebhookSink) -> Result<SweepReport, RecoveryError> {
    let mut report = SweepReport::default();

    let expired: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT e.execution_id, e.agent, r.estimated_micro
         FROM executions e
         JOIN reservations r ON r.execution_id = e.execution_id
         WHERE e.state = 'RESERVED' AND r.state = 'RESERVED' AND r.expiry_at < now()",
    )
    .fetch_all(pool)
    .await?;
    for (execution_id, agent, estimated_micro) in expired {
        budget::release(
            pool,
            webhooks,
            &agent,
            &execution_id,
            estimated_micro,
            "Recovered stale reservation",
            Some(504),
        )
        .await?;
        report.released_expired_reservations += 1;
    }

    let orphaned_reserving: Vec<String> = sqlx::query_scalar(
        "SELECT e.execution_id FROM executions e
         LEFT JOIN reservations r ON r.execution_id = e.execution_id
         WHERE e.state = 'RESERVING' AND r.execution_id IS NULL",
    )
    .fetch_all(pool)
    .await?;
    for execution_id in orphaned_reserving {
        budget::mark_failed(pool, webhooks, &execution_id, "Interrupted during reserving", 500).await?;
        report.failed_orphaned_reserving += 1;
    }

    let orphaned_dispatched: Vec<String> = sqlx::query_scalar(
        "SELECT e.execution_id FROM executions e
         LEFT JOIN reservations r ON r.execution_id = e.execution_id
         WHERE e.state IN ('DISPATCHED', 'RESPONSE_RECEIVED') AND r.execution_id IS NULL",
    )
    .fetch_all(pool)
    .await?;
    for execution_id in orphaned_dispatched {
        budget::mark_failed(pool, webhooks, &execution_id, "Missing reservation during recovery", 500).await?;
        report.failed_orphaned_dispatched += 1;
    }

    if report.total() > 0 {
        tracing::info!(
            released = report.released_expired_reservations,
            failed_reserving = report.failed_orphaned_reserving,
            failed_dispatched = report.failed_orphaned_dispatched,
            "recovery sweep reconciled stale state"
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_sums_all_categories() {
        let report = SweepReport {
            released_expired_reservations: 2,
            failed_orphaned_reserving: 1,
            failed_orphaned_dispatched: 3,
        };
        assert_eq!(report.total(), 6);
    }

    #[test]
    fn empty_report_has_zero_total() {
        assert_eq!(SweepReport::default().total(), 0);
    }
}
