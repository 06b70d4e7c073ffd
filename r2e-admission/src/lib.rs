//! Admission pipeline for AEX: lifecycle gate, routing, idempotency,
//! rate limiting, policy evaluation, cost estimation, and reservation,
//! composed into the single [`controller::admit`] entry point the HTTP
//! layer calls before any upstream dispatch.

pub mod agent;
pub mod controller;
pub mod cost;
pub mod error;
pub mod idempotency;
pub mod rate_limit;

pub use agent::AgentRecord;
pub use controller::{admit, AdmissionOutcome, AdmissionRequest, AdmissionResult, ReplayResult};
pub use error::AdmissionError;
