//! Ties the three independent checks together into one report, the
//! shape returned by the admin replay endpoint.

use sqlx::PgPool;

use crate::balance::{replay_balances, BalanceDeviation};
use crate::chain::{verify_chain, ChainVerification};
use crate::error::ReplayError;
use crate::invariants::{check_invariants, InvariantViolation};

#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditReport {
    pub chain: ChainVerification,
    pub balance_deviations: Vec<BalanceDeviation>,
    pub invariant_violations: Vec<InvariantViolation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.chain.is_valid() && self.balance_deviations.is_empty() && self.invariant_violations.is_empty()
    }
}

/// Run the hash-chain verifier, the balance replay, and every invariant
/// query and return them together. Each check runs independent of the
/// others' outcome — a broken chain does not block the balance or
/// invariant passes from also reporting what they find.
pub async fn run_full_audit(pool: &PgPool) -> Result<AuditReport, ReplayError> {
    let chain = verify_chain(pool).await?;
    let balance_deviations = replay_balances(pool).await?;
    let invariant_violations = check_invariants(pool).await?;
    Ok(AuditReport { chain, balance_deviations, invariant_violations })
}
