//! Burn-rate alert synthesis: a periodic task that compares each agent's
//! spend delta over a rolling window against its remaining budget and
//! emits structured log records plus a best-effort webhook delivery.
//! The HTTP fan-out transport itself stays external — this only
//! guarantees the alert is observable (logs, gauges, a delivery row)
//! the moment it's detected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use r2e_core::ServiceComponent;
use r2e_ledger::WebhookSink;
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// How often the burn-rate sample is taken.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// An agent whose projected time-to-exhaustion (at its current burn
/// rate) drops below this many minutes triggers an alert.
const ALERT_HORIZON_MINUTES: f64 = 10.0;

#[derive(Clone, Copy)]
struct Sample {
    spent_micro: i64,
    at: Instant,
}

pub struct AlertService {
    pool: PgPool,
    webhooks: Arc<dyn WebhookSink>,
    prior: Arc<Mutex<HashMap<String, Sample>>>,
}

impl ServiceComponent<AppState> for AlertService {
    fn from_state(state: &AppState) -> Self {
        Self {
            pool: state.pool.clone(),
            webhooks: state.webhooks.clone(),
            prior: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn start(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("alert synthesis loop shutting down");
                    return;
                }
                _ = tokio::time::sleep(SAMPLE_INTERVAL) => {
                    if let Err(err) = self.sample_once().await {
                        tracing::error!(error = %err, "burn-rate sampling failed");
                    }
                }
            }
        }
    }
}

impl AlertService {
    async fn sample_once(&self) -> Result<(), sqlx::Error> {
        let rows: Vec<(String, String, i64, i64, i64)> = sqlx::query_as(
            "SELECT name, tenant_id, budget_micro, spent_micro, reserved_micro FROM agents",
        )
        .fetch_all(&self.pool)
        .await?;

        let now = Instant::now();
        let mut prior = self.prior.lock().await;

        for (name, tenant_id, budget_micro, spent_micro, reserved_micro) in rows {
            r2e_prometheus::set_agent_balances(&name, &tenant_id, spent_micro, reserved_micro);

            let Some(previous) = prior.get(&name).copied() else {
                prior.insert(name.clone(), Sample { spent_micro, at: now });
                continue;
            };

            let elapsed_minutes = now.duration_since(previous.at).as_secs_f64() / 60.0;
            if elapsed_minutes <= 0.0 {
                continue;
            }
            let delta_micro = (spent_micro - previous.spent_micro).max(0) as f64;
            let burn_rate_per_minute = delta_micro / elapsed_minutes;
            r2e_prometheus::set_agent_burn_rate(&name, &tenant_id, burn_rate_per_minute);

            if burn_rate_per_minute > 0.0 {
                let remaining = (budget_micro - spent_micro - reserved_micro).max(0) as f64;
                let minutes_to_exhaustion = remaining / burn_rate_per_minute;
                if minutes_to_exhaustion < ALERT_HORIZON_MINUTES {
                    tracing::warn!(
                        agent = %name,
                        tenant_id = %tenant_id,
                        burn_rate_micro_per_minute = burn_rate_per_minute,
                        minutes_to_exhaustion,
                        "agent projected to exhaust budget within alert horizon"
                    );
                    self.webhooks
                        .dispatch(
                            &tenant_id,
                            "alert.burn_rate",
                            &name,
                            json!({
                                "agent": name,
                                "burn_rate_micro_per_minute": burn_rate_per_minute,
                                "minutes_to_exhaustion": minutes_to_exhaustion,
                                "remaining_micro": remaining,
                            }),
                        )
                        .await;
                }
            }

            prior.insert(name, Sample { spent_micro, at: now });
        }

        Ok(())
    }
}
