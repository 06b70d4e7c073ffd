//! Single-query invariant checks over live ledger state, run independent
//! of the hash-chain and balance replay so a corrupted chain never hides
//! a simpler, more actionable violation.

use sqlx::PgPool;

use crate::error::ReplayError;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InvariantViolation {
    pub name: &'static str,
    pub detail: String,
}

/// `agents.spent_micro` may never exceed `agents.budget_micro`. The
/// schema already enforces this with a `CHECK` constraint; this query
/// exists so a replay run reports it alongside every other violation
/// instead of only surfacing as a write-time constraint failure.
async fn spent_within_budget(pool: &PgPool) -> Result<Vec<InvariantViolation>, ReplayError> {
    let rows: Vec<(String, i64, i64)> = sqlx::query_as(
        "SELECT name, spent_micro, budget_micro FROM agents WHERE spent_micro > budget_micro",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(name, spent, budget)| InvariantViolation {
            name: "spent_within_budget",
            detail: format!("agent {name}: spent_micro={spent} exceeds budget_micro={budget}"),
        })
        .collect())
}

async fn no_negative_balances(pool: &PgPool) -> Result<Vec<InvariantViolation>, ReplayError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM agents WHERE budget_micro < 0 OR spent_micro < 0 OR reserved_micro < 0",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(name,)| InvariantViolation {
            name: "no_negative_balances",
            detail: format!("agent {name} has a negative monetary column"),
        })
        .collect())
}

/// `agents.reserved_micro` must equal the sum of that agent's currently
/// open (`RESERVED`) reservations — every reservation that closes goes
/// through exactly one of `budget::commit` or `budget::release`, both of
/// which zero it back out of `agents.reserved_micro` in the same
/// transaction that flips the reservation's state.
async fn reserved_matches_open_reservations(pool: &PgPool) -> Result<Vec<InvariantViolation>, ReplayError> {
    let rows: Vec<(String, i64, i64)> = sqlx::query_as(
        "SELECT a.name, COALESCE(SUM(r.estimated_micro), 0), a.reserved_micro
         FROM agents a
         LEFT JOIN reservations r ON r.agent = a.name AND r.state = 'RESERVED'
         GROUP BY a.name, a.reserved_micro
         HAVING COALESCE(SUM(r.estimated_micro), 0) != a.reserved_micro",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(name, summed, reserved)| InvariantViolation {
            name: "reserved_matches_open_reservations",
            detail: format!("agent {name}: sum(open reservations)={summed} != agents.reserved_micro={reserved}"),
        })
        .collect())
}

async fn usage_events_have_positive_cost(pool: &PgPool) -> Result<Vec<InvariantViolation>, ReplayError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT seq FROM event_log
         WHERE event_type = 'usage.commit'
           AND COALESCE((payload_json::json->>'cost_micro')::bigint, 0) <= 0",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(seq,)| InvariantViolation {
            name: "usage_events_positive_cost",
            detail: format!("event_log.seq={seq} is a usage.commit with non-positive cost_micro"),
        })
        .collect())
}

async fn spent_matches_usage_commits(pool: &PgPool) -> Result<Vec<InvariantViolation>, ReplayError> {
    let rows: Vec<(String, i64, i64)> = sqlx::query_as(
        "SELECT a.name, COALESCE(SUM((e.payload_json::json->>'cost_micro')::bigint), 0), a.spent_micro
         FROM agents a
         LEFT JOIN event_log e ON e.agent = a.name AND e.event_type = 'usage.commit'
         GROUP BY a.name, a.spent_micro
         HAVING COALESCE(SUM((e.payload_json::json->>'cost_micro')::bigint), 0) != a.spent_micro",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(name, summed, spent)| InvariantViolation {
            name: "spent_matches_usage_commits",
            detail: format!("agent {name}: sum(usage.commit cost_micro)={summed} != agents.spent_micro={spent}"),
        })
        .collect())
}

/// Run every invariant query and return the concatenation of every
/// violation found, each tagged with which invariant it broke.
pub async fn check_invariants(pool: &PgPool) -> Result<Vec<InvariantViolation>, ReplayError> {
    let mut violations = Vec::new();
    violations.extend(spent_within_budget(pool).await?);
    violations.extend(no_negative_balances(pool).await?);
    violations.extend(reserved_matches_open_reservations(pool).await?);
    violations.extend(usage_events_have_positive_cost(pool).await?);
    violations.extend(spent_matches_usage_commits(pool).await?);
    Ok(violations)
}
