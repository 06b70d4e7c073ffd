//! Single explicit application state threaded through every handler via
//! `axum::extract::State` — the DB pool, HTTP client, config handle, and
//! caches, as called out in the glossary entry for `AppState`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2e_cache::TtlCache;
use r2e_ledger::{CachedExecutionResult, WebhookSink};
use r2e_policy::PolicyPlugin;
use r2e_rate_limit::RateLimitRegistry;
use r2e_router::ConfigLoader;
use sqlx::PgPool;

use crate::webhook::LoggingWebhookSink;

/// Deep-replay cache TTL — short-lived, only meant to absorb a burst of
/// duplicate idempotent POSTs hitting the same execution_id.
const REPLAY_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub http_client: reqwest::Client,
    pub router_config: Arc<ConfigLoader>,
    pub policy_plugins: Arc<Vec<Box<dyn PolicyPlugin>>>,
    pub rate_limit_fast: Option<RateLimitRegistry>,
    pub webhooks: Arc<dyn WebhookSink>,
    pub replay_cache: TtlCache<String, CachedExecutionResult>,
    pub admin_key: Option<String>,
    pub token_secret: Option<String>,
    /// Timestamp of the last successful recovery sweep, surfaced by
    /// `/ready`. `None` until the startup sweep completes.
    pub last_sweep: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl AppState {
    pub fn new(pool: PgPool, http_client: reqwest::Client, router_config: ConfigLoader) -> Self {
        Self {
            pool: pool.clone(),
            http_client,
            router_config: Arc::new(router_config),
            policy_plugins: Arc::new(r2e_policy::default_registry()),
            rate_limit_fast: Some(RateLimitRegistry::default()),
            webhooks: Arc::new(LoggingWebhookSink::new(pool)),
            replay_cache: TtlCache::new(REPLAY_CACHE_TTL),
            admin_key: std::env::var("AEX_ADMIN_KEY").ok().filter(|s| !s.is_empty()),
            token_secret: std::env::var("AEX_TOKEN_SECRET").ok().filter(|s| !s.is_empty()),
            last_sweep: Arc::new(Mutex::new(None)),
        }
    }

    pub fn record_sweep(&self) {
        *self.last_sweep.lock().expect("last_sweep lock poisoned") = Some(Utc::now());
    }

    /// Resolve a provider's API key from its canonicalized environment
    /// variable name: `AEX_PROVIDER_<NAME>_API_KEY`.
    pub fn provider_api_key(&self, provider_name: &str) -> Option<String> {
        let env_name = format!(
            "AEX_PROVIDER_{}_API_KEY",
            provider_name.to_uppercase().replace(['-', ' '], "_")
        );
        std::env::var(env_name).ok().filter(|s| !s.is_empty())
    }
}
