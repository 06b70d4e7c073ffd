//! Folds the event log's `budget.reserve` / `usage.commit` /
//! `reservation.release` events into a per-agent balance and compares
//! the result against the live `agents` row, the same arithmetic
//! [`r2e_ledger::budget`] applies as each event is appended.

use std::collections::HashMap;

use serde_json::Value;
use sqlx::PgPool;

use crate::error::ReplayError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct AgentBalance {
    pub spent_micro: i64,
    pub reserved_micro: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AgentEventRow {
    pub agent: Option<String>,
    pub event_type: String,
    pub payload_json: String,
}

fn payload_i64(payload: &str, key: &str) -> i64 {
    serde_json::from_str::<Value>(payload)
        .ok()
        .and_then(|v| v.get(key).and_then(Value::as_i64))
        .unwrap_or(0)
}

/// Fold a sequence of ledger events into a per-agent balance. Events for
/// a given agent must be processed in the order they were appended;
/// order across different agents does not matter.
pub fn fold_balances(rows: &[AgentEventRow]) -> HashMap<String, AgentBalance> {
    let mut balances: HashMap<String, AgentBalance> = HashMap::new();

    for row in rows {
        let Some(agent) = &row.agent else { continue };
        let entry = balances.entry(agent.clone()).or_default();
        let estimated = payload_i64(&row.payload_json, "estimated_micro");

        match row.event_type.as_str() {
            "budget.reserve" => entry.reserved_micro += estimated,
            "usage.commit" => {
                let cost = payload_i64(&row.payload_json, "cost_micro");
                entry.spent_micro += cost;
                entry.reserved_micro = (entry.reserved_micro - estimated).max(0);
            }
            "reservation.release" => {
                entry.reserved_micro = (entry.reserved_micro - estimated).max(0);
            }
            _ => {}
        }
    }

    balances
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BalanceDeviation {
    pub agent: String,
    pub replayed: AgentBalance,
    pub live_spent_micro: i64,
    pub live_reserved_micro: i64,
}

/// Replay the whole event log and flag every agent whose live
/// `spent_micro`/`reserved_micro` disagrees with what the event history
/// implies.
pub async fn replay_balances(pool: &PgPool) -> Result<Vec<BalanceDeviation>, ReplayError> {
    let rows: Vec<AgentEventRow> = sqlx::query_as(
        "SELECT agent, event_type, payload_json FROM event_log
         WHERE event_type IN ('budget.reserve', 'usage.commit', 'reservation.release')
         ORDER BY chain_partition, seq ASC",
    )
    .fetch_all(pool)
    .await?;

    let replayed = fold_balances(&rows);

    let live: Vec<(String, i64, i64)> =
        sqlx::query_as("SELECT name, spent_micro, reserved_micro FROM agents")
            .fetch_all(pool)
            .await?;

    let mut deviations = Vec::new();
    for (agent, live_spent, live_reserved) in live {
        let balance = replayed.get(&agent).copied().unwrap_or_default();
        if balance.spent_micro != live_spent || balance.reserved_micro != live_reserved {
            deviations.push(BalanceDeviation {
                agent,
                replayed: balance,
                live_spent_micro: live_spent,
                live_reserved_micro: live_reserved,
            });
        }
    }

    Ok(deviations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(agent: &str, event_type: &str, payload: &str) -> AgentEventRow {
        AgentEventRow { agent: Some(agent.to_string()), event_type: event_type.to_string(), payload_json: payload.to_string() }
    }

    #[test]
    fn reserve_then_commit_leaves_zero_reserved() {
        let rows = vec![
            event("agent-a", "budget.reserve", "{\"estimated_micro\":500}"),
            event("agent-a", "usage.commit", "{\"cost_micro\":420,\"estimated_micro\":500}"),
        ];
        let balances = fold_balances(&rows);
        let balance = balances["agent-a"];
        assert_eq!(balance.spent_micro, 420);
        assert_eq!(balance.reserved_micro, 0);
    }

    #[test]
    fn release_clears_reservation_without_touching_spent() {
        let rows = vec![
            event("agent-a", "budget.reserve", "{\"estimated_micro\":100}"),
            event("agent-a", "reservation.release", "{\"estimated_micro\":100,\"reason\":\"timeout\"}"),
        ];
        let balances = fold_balances(&rows);
        let balance = balances["agent-a"];
        assert_eq!(balance.spent_micro, 0);
        assert_eq!(balance.reserved_micro, 0);
    }

    #[test]
    fn events_for_distinct_agents_do_not_interfere() {
        let rows = vec![
            event("agent-a", "budget.reserve", "{\"estimated_micro\":100}"),
            event("agent-b", "budget.reserve", "{\"estimated_micro\":200}"),
        ];
        let balances = fold_balances(&rows);
        assert_eq!(balances["agent-a"].reserved_micro, 100);
        assert_eq!(balances["agent-b"].reserved_micro, 200);
    }

    #[test]
    fn malformed_payload_is_treated_as_zero_not_a_panic() {
        let rows = vec![event("agent-a", "budget.reserve", "not json")];
        let balances = fold_balances(&rows);
        assert_eq!(balances["agent-a"].reserved_micro, 0);
    }
}
