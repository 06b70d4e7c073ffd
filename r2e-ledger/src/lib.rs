//! Reservation/commit/release ledger and hash-chained event log for AEX.
//!
//! [`budget`] holds the concurrency-safe state machine; [`events`] is the
//! append-only audit trail it writes to; [`types`] are the shared row/DTO
//! types; [`webhook`] is the notification sink budget transitions fan out
//! to once their transaction has committed.

pub mod budget;
pub mod error;
pub mod events;
pub mod snapshot;
pub mod types;
pub mod webhook;

pub use error::LedgerError;
pub use snapshot::{create_snapshot, rollback_snapshot, SnapshotReport};
pub use types::{
    AgentLedgerRow, CachedExecutionResult, ExecutionRow, ExecutionState, ReservationDecision,
    ReservationState, Scope, DEFAULT_PROJECT_ID, DEFAULT_TENANT_ID,
};
pub use webhook::{NullWebhookSink, WebhookSink};
