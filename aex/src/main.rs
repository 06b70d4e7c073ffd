//! AEX gateway entrypoint: wires the DB pool, model/provider config,
//! ledger-backed admission surface, background recovery/alert workers,
//! and the ambient HTTP stack (health, metrics, security headers) into
//! one `axum::serve` loop with graceful shutdown.

mod alerts;
mod auth;
mod recovery_service;
mod routes;
mod state;
mod tools;
mod webhook;

use std::time::Duration;

use r2e_core::health::{HealthBuilder, HealthIndicator, HealthStatus};
use r2e_core::secure_headers::{SecureHeaders, SecureHeadersLayer};
use r2e_core::ServiceComponent;
use r2e_prometheus::{init_metrics, metrics_handler, MetricsConfig, PrometheusLayer};
use r2e_router::ConfigLoader;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DB_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const STARTUP_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether a bounded startup step failing should abort the process
/// instead of limping forward with a possibly-stale ledger. Defaults to
/// `true`; set `AEX_STRICT_START=false` to degrade instead of exiting.
fn strict_start() -> bool {
    std::env::var("AEX_STRICT_START")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true)
}

struct DbHealth {
    pool: sqlx::PgPool,
}

impl HealthIndicator for DbHealth {
    fn name(&self) -> &str {
        "db"
    }

    async fn check(&self) -> HealthStatus {
        match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => HealthStatus::Up,
            Err(err) => HealthStatus::Down(err.to_string()),
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let pg_dsn = std::env::var("AEX_PG_DSN").expect("AEX_PG_DSN must be set");
    let config_path = std::env::var("AEX_CONFIG_PATH").expect("AEX_CONFIG_PATH must be set");
    let bind_addr = std::env::var("AEX_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

    let pool = match tokio::time::timeout(
        STARTUP_STEP_TIMEOUT,
        PgPoolOptions::new().max_connections(20).acquire_timeout(DB_CONNECT_TIMEOUT).connect(&pg_dsn),
    )
    .await
    {
        Ok(Ok(pool)) => pool,
        Ok(Err(err)) => {
            tracing::error!(error = %err, "failed to connect to database");
            return Err(err.into());
        }
        Err(_) => {
            tracing::error!("timed out connecting to database");
            return Err("database connect timed out".into());
        }
    };

    match tokio::time::timeout(STARTUP_STEP_TIMEOUT, sqlx::migrate!("../r2e-ledger/migrations").run(&pool)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::error!(error = %err, "failed to run database migrations");
            return Err(err.into());
        }
        Err(_) => {
            tracing::error!("timed out running database migrations");
            return Err("migration timed out".into());
        }
    }

    let router_config = ConfigLoader::load(config_path)?;

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(60))
        .build()?;

    let state = AppState::new(pool.clone(), http_client, router_config);

    tracing::info!("running initial recovery sweep before accepting traffic");
    match tokio::time::timeout(
        STARTUP_STEP_TIMEOUT,
        r2e_recovery::sweep_once(&state.pool, state.webhooks.as_ref()),
    )
    .await
    {
        Ok(Ok(report)) => {
            state.record_sweep();
            tracing::info!(
                released = report.released_expired_reservations,
                failed_reserving = report.failed_orphaned_reserving,
                failed_dispatched = report.failed_orphaned_dispatched,
                "initial recovery sweep complete"
            );
        }
        Ok(Err(err)) => {
            tracing::error!(error = %err, "initial recovery sweep failed");
            if strict_start() {
                return Err(err.into());
            }
        }
        Err(_) => {
            tracing::error!("initial recovery sweep timed out");
            if strict_start() {
                return Err("initial recovery sweep timed out".into());
            }
        }
    }

    match r2e_replay::run_full_audit(&state.pool).await {
        Ok(report) if !report.is_clean() => {
            tracing::warn!("ledger integrity check found deviations at startup");
        }
        Ok(_) => tracing::info!("ledger integrity check clean at startup"),
        Err(err) => {
            tracing::error!(error = %err, "ledger integrity check failed at startup");
            if strict_start() {
                return Err(err.into());
            }
        }
    }

    init_metrics(&MetricsConfig::default());

    let shutdown = CancellationToken::new();

    let recovery_service = recovery_service::RecoveryService::from_state(&state);
    let recovery_handle = tokio::spawn(recovery_service.start(shutdown.clone()));

    let alert_service = alerts::AlertService::from_state(&state);
    let alert_handle = tokio::spawn(alert_service.start(shutdown.clone()));

    let health_router = HealthBuilder::new()
        .check(DbHealth { pool: pool.clone() })
        .cache_ttl(Duration::from_secs(5))
        .build();

    let app = routes::build_router(state)
        .merge(health_router)
        .route("/metrics", axum::routing::get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(PrometheusLayer::new(MetricsConfig::default()))
        .layer(SecureHeadersLayer::new(SecureHeaders::default()));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "AEX gateway listening");

    axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown_signal()).await?;

    shutdown.cancel();
    let _ = tokio::join!(recovery_handle, alert_handle);

    tracing::info!("AEX gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for Ctrl-C");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, starting graceful shutdown");
}
