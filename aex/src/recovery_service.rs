//! Periodic recovery sweep, wired as a [`ServiceComponent`] so it is
//! spawned and shut down the same way every other background worker in
//! the gateway is. Mirrors [`r2e_recovery::run_recovery_loop`]'s
//! select-sleep-or-shutdown shape but additionally stamps
//! `AppState::last_sweep` so `/ready` can report sweep staleness.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use r2e_core::ServiceComponent;
use r2e_ledger::WebhookSink;
use r2e_recovery::{sweep_once, RecoveryConfig};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

pub struct RecoveryService {
    pool: PgPool,
    webhooks: Arc<dyn WebhookSink>,
    last_sweep: Arc<Mutex<Option<DateTime<Utc>>>>,
    config: RecoveryConfig,
}

impl ServiceComponent<AppState> for RecoveryService {
    fn from_state(state: &AppState) -> Self {
        Self {
            pool: state.pool.clone(),
            webhooks: state.webhooks.clone(),
            last_sweep: state.last_sweep.clone(),
            config: RecoveryConfig::default(),
        }
    }

    async fn start(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("recovery sweep loop shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    match sweep_once(&self.pool, self.webhooks.as_ref()).await {
                        Ok(_) => {
                            *self.last_sweep.lock().expect("last_sweep lock poisoned") = Some(Utc::now());
                        }
                        Err(err) => tracing::error!(error = %err, "recovery sweep failed"),
                    }
                }
            }
        }
    }
}
