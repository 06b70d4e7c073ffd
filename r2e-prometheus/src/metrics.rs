use prometheus::{
    exponential_buckets, histogram_opts, opts, Encoder, GaugeVec, HistogramVec, IntCounterVec,
    IntGauge, Registry, TextEncoder,
};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Global metrics instance. In addition to the generic HTTP request
/// metrics every gateway exposes, this carries the ledger-specific
/// series an operator needs to watch agent spend without querying
/// Postgres directly.
pub struct Metrics {
    pub registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub http_requests_in_flight: IntGauge,
    pub admission_denied_total: IntCounterVec,
    pub settlement_committed_total: IntCounterVec,
    pub settlement_released_total: IntCounterVec,
    pub agent_spent_micro: GaugeVec,
    pub agent_reserved_micro: GaugeVec,
    pub agent_burn_rate_micro_per_minute: GaugeVec,
}

impl Metrics {
    fn new(config: &MetricsConfig) -> Self {
        let registry = Registry::new();

        let prefix = config
            .namespace
            .as_ref()
            .map(|s| format!("{}_", s))
            .unwrap_or_default();

        let http_requests_total = IntCounterVec::new(
            opts!(
                format!("{}http_requests_total", prefix),
                "Total number of HTTP requests"
            ),
            &["method", "path", "status"],
        )
        .expect("metric can be created");

        let http_request_duration_seconds = HistogramVec::new(
            histogram_opts!(
                format!("{}http_request_duration_seconds", prefix),
                "HTTP request duration in seconds",
                config.buckets.clone()
            ),
            &["method", "path"],
        )
        .expect("metric can be created");

        let http_requests_in_flight = IntGauge::new(
            format!("{}http_requests_in_flight", prefix),
            "Number of HTTP requests currently being processed",
        )
        .expect("metric can be created");

        let admission_denied_total = IntCounterVec::new(
            opts!(
                format!("{}admission_denied_total", prefix),
                "Requests denied during admission, by reason"
            ),
            &["agent", "reason"],
        )
        .expect("metric can be created");

        let settlement_committed_total = IntCounterVec::new(
            opts!(
                format!("{}settlement_committed_total", prefix),
                "Executions settled successfully"
            ),
            &["agent", "model"],
        )
        .expect("metric can be created");

        let settlement_released_total = IntCounterVec::new(
            opts!(
                format!("{}settlement_released_total", prefix),
                "Reservations released without a successful commit, by reason"
            ),
            &["agent", "reason"],
        )
        .expect("metric can be created");

        let agent_spent_micro = GaugeVec::new(
            opts!(
                format!("{}agent_spent_micro", prefix),
                "Agent's committed spend in micro-USD"
            ),
            &["agent", "tenant_id"],
        )
        .expect("metric can be created");

        let agent_reserved_micro = GaugeVec::new(
            opts!(
                format!("{}agent_reserved_micro", prefix),
                "Agent's currently reserved (uncommitted) budget in micro-USD"
            ),
            &["agent", "tenant_id"],
        )
        .expect("metric can be created");

        let agent_burn_rate_micro_per_minute = GaugeVec::new(
            opts!(
                format!("{}agent_burn_rate_micro_per_minute", prefix),
                "Rolling spend rate per agent, in micro-USD per minute"
            ),
            &["agent", "tenant_id"],
        )
        .expect("metric can be created");

        registry.register(Box::new(http_requests_total.clone())).expect("metric can be registered");
        registry.register(Box::new(http_request_duration_seconds.clone())).expect("metric can be registered");
        registry.register(Box::new(http_requests_in_flight.clone())).expect("metric can be registered");
        registry.register(Box::new(admission_denied_total.clone())).expect("metric can be registered");
        registry.register(Box::new(settlement_committed_total.clone())).expect("metric can be registered");
        registry.register(Box::new(settlement_released_total.clone())).expect("metric can be registered");
        registry.register(Box::new(agent_spent_micro.clone())).expect("metric can be registered");
        registry.register(Box::new(agent_reserved_micro.clone())).expect("metric can be registered");
        registry.register(Box::new(agent_burn_rate_micro_per_minute.clone())).expect("metric can be registered");

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_requests_in_flight,
            admission_denied_total,
            settlement_committed_total,
            settlement_released_total,
            agent_spent_micro,
            agent_reserved_micro,
            agent_burn_rate_micro_per_minute,
        }
    }
}

/// Configuration for metrics.
#[derive(Clone)]
pub struct MetricsConfig {
    pub namespace: Option<String>,
    pub buckets: Vec<f64>,
    pub exclude_paths: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            // Default buckets: 1ms to 10s
            buckets: exponential_buckets(0.001, 2.0, 14).unwrap(),
            exclude_paths: vec!["/metrics".to_string(), "/health".to_string()],
        }
    }
}

/// Initialize global metrics with the given config.
/// Returns the metrics instance (or existing one if already initialized).
pub fn init_metrics(config: &MetricsConfig) -> &'static Metrics {
    METRICS.get_or_init(|| Metrics::new(config))
}

/// Get the global metrics instance.
/// Panics if metrics haven't been initialized.
pub fn metrics() -> &'static Metrics {
    METRICS
        .get()
        .expect("Metrics not initialized. Call init_metrics() first.")
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = metrics().registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record an HTTP request.
pub fn record_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let m = metrics();
    m.http_requests_total
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    m.http_request_duration_seconds
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

/// Increment in-flight requests counter.
pub fn inc_in_flight() {
    metrics().http_requests_in_flight.inc();
}

/// Decrement in-flight requests counter.
pub fn dec_in_flight() {
    metrics().http_requests_in_flight.dec();
}

/// Record an admission-time denial (lifecycle gate, rate limit, policy,
/// or budget rejection) for burn-rate and denial-rate dashboards.
pub fn record_admission_denied(agent: &str, reason: &str) {
    metrics().admission_denied_total.with_label_values(&[agent, reason]).inc();
}

/// Record a successful settlement (reservation committed against actual usage).
pub fn record_settlement_committed(agent: &str, model: &str) {
    metrics().settlement_committed_total.with_label_values(&[agent, model]).inc();
}

/// Record a reservation released without a commit (upstream failure,
/// policy denial on the response, stream disconnect, recovery sweep).
pub fn record_settlement_released(agent: &str, reason: &str) {
    metrics().settlement_released_total.with_label_values(&[agent, reason]).inc();
}

/// Set an agent's live spent/reserved gauges, normally refreshed on a
/// timer from the `agents` table rather than per-request.
pub fn set_agent_balances(agent: &str, tenant_id: &str, spent_micro: i64, reserved_micro: i64) {
    let m = metrics();
    m.agent_spent_micro.with_label_values(&[agent, tenant_id]).set(spent_micro as f64);
    m.agent_reserved_micro.with_label_values(&[agent, tenant_id]).set(reserved_micro as f64);
}

/// Set an agent's rolling burn rate, in micro-USD per minute.
pub fn set_agent_burn_rate(agent: &str, tenant_id: &str, micro_per_minute: f64) {
    metrics()
        .agent_burn_rate_micro_per_minute
        .with_label_values(&[agent, tenant_id])
        .set(micro_per_minute);
}
