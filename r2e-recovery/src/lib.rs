//! Recovery sweep for AEX: reconciles expired reservations and
//! executions stranded mid-transition by a crashed worker.

pub mod error;
pub mod loop_runner;
pub mod sweep;

pub use error::RecoveryError;
pub use loop_runner::{run_recovery_loop, RecoveryConfig, DEFAULT_INTERVAL};
pub use sweep::{sweep_once, SweepReport};
