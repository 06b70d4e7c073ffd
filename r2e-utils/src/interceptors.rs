//! Structured logging and TTL-cache-backed memoization helpers used across
//! the gateway's handler code.
//!
//! These are plain async helpers (not method-level interceptors) — AEX
//! wires the gateway with hand-written axum handlers rather than a
//! macro-driven controller layer, so the wrapping happens at the call site
//! instead of via attribute macros.

use std::future::Future;
use std::time::Duration;

/// Log level for [`log_at_level`] and the timing helpers below.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Log a message at the given level using `tracing`.
pub fn log_at_level(level: LogLevel, target: &str, msg: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(target = target, "{}", msg),
        LogLevel::Debug => tracing::debug!(target = target, "{}", msg),
        LogLevel::Info => tracing::info!(target = target, "{}", msg),
        LogLevel::Warn => tracing::warn!(target = target, "{}", msg),
        LogLevel::Error => tracing::error!(target = target, "{}", msg),
    }
}

/// Run `fut`, logging entry/exit at `level` under `target`.
pub async fn logged<F, T>(level: LogLevel, target: &str, fut: F) -> T
where
    F: Future<Output = T>,
{
    log_at_level(level, target, "entering");
    let result = fut.await;
    log_at_level(level, target, "exiting");
    result
}

/// Run `fut`, logging its elapsed time under `target`. If `threshold_ms` is
/// set, only logs when execution exceeds the threshold.
pub async fn timed<F, T>(level: LogLevel, target: &str, threshold_ms: Option<u64>, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = std::time::Instant::now();
    let result = fut.await;
    let elapsed_ms = start.elapsed().as_millis() as u64;
    match threshold_ms {
        Some(threshold) if elapsed_ms <= threshold => {}
        _ => log_at_level(level, target, &format!("elapsed_ms={elapsed_ms}")),
    }
    result
}

/// Memoize the result of `fut` under `key` in the global [`r2e_cache`]
/// backend for `ttl`. On a cache hit, `fut` is never polled.
pub async fn cached<F>(key: &str, ttl: Duration, fut: F) -> bytes::Bytes
where
    F: Future<Output = bytes::Bytes>,
{
    let store = r2e_cache::cache_backend();
    if let Some(hit) = store.get(key).await {
        return hit;
    }
    let value = fut.await;
    store.set(key, value.clone(), ttl).await;
    value
}

/// Remove every cache entry whose key starts with `group:`.
pub async fn invalidate_group(group: &str) {
    r2e_cache::cache_backend()
        .remove_by_prefix(&format!("{group}:"))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logged_passes_through_result() {
        let result = logged(LogLevel::Info, "test", async { 42 }).await;
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn timed_passes_through_result() {
        let result = timed(LogLevel::Debug, "test", None, async { "ok" }).await;
        assert_eq!(result, "ok");
    }

    #[tokio::test]
    async fn cached_memoizes_value() {
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let compute = || async {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            bytes::Bytes::from_static(b"value")
        };
        let key = "test:cached_memoizes_value";
        invalidate_group("test").await;
        let first = cached(key, Duration::from_secs(30), compute()).await;
        let second = cached(key, Duration::from_secs(30), compute()).await;
        assert_eq!(first, second);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
