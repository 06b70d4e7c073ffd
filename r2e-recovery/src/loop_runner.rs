//! Periodic sweep runner, started once at boot and then left running for
//! the life of the process. Matches the background-worker shape
//! documented on [`r2e_core::ServiceComponent`]: a loop selecting between
//! a cancellation token and a sleep, owned by whatever constructs it.

use std::sync::Arc;
use std::time::Duration;

use r2e_ledger::WebhookSink;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::sweep::sweep_once;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
    pub interval: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { interval: DEFAULT_INTERVAL }
    }
}

/// Run sweeps on `config.interval` until `shutdown` is cancelled. The
/// caller is expected to run one sweep synchronously at startup (see
/// the binary's strict-start sequence) before handing this to a
/// background task — this loop only covers the steady-state repeats.
pub async fn run_recovery_loop(pool: PgPool, webhooks: Arc<dyn WebhookSink>, config: RecoveryConfig, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("recovery sweep loop shutting down");
                return;
            }
            _ = tokio::time::sleep(config.interval) => {
                if let Err(err) = sweep_once(&pool, webhooks.as_ref()).await {
                    tracing::error!(error = %err, "recovery sweep failed");
                }
            }
        }
    }
}
