//! Prometheus metrics for AEX: a Tower layer tracking request
//! count/latency/in-flight, plus ledger-specific counters and gauges
//! (admission denials, settlements, per-agent spend and burn rate) fed
//! by the admission/proxy/recovery pipeline and the admin background
//! refresh task.
//!
//! Wired directly onto the gateway's `Router` with `.layer(...)` and
//! `.route("/metrics", get(metrics_handler))` — no plugin/builder
//! indirection, since the gateway assembles its router by hand.

pub mod handler;
pub mod layer;
pub mod metrics;

pub use handler::metrics_handler;
pub use layer::PrometheusLayer;
pub use metrics::{
    dec_in_flight, encode_metrics, inc_in_flight, init_metrics, metrics as global_metrics,
    record_admission_denied, record_request, record_settlement_committed,
    record_settlement_released, set_agent_balances, set_agent_burn_rate, Metrics, MetricsConfig,
};
