//! Offline-safe auditing for AEX: hash-chain verification, balance
//! replay, and invariant checks over the ledger's Postgres tables. Used
//! by the admin `/admin/replay` surface and by operators investigating a
//! suspected integrity incident.

pub mod audit;
pub mod balance;
pub mod chain;
pub mod error;
pub mod invariants;

pub use audit::{run_full_audit, AuditReport};
pub use balance::{replay_balances, AgentBalance, BalanceDeviation};
pub use chain::{verify_chain, ChainDeviation, ChainVerification};
pub use error::ReplayError;
pub use invariants::{check_invariants, InvariantViolation};
