//! Deterministic kernel + plugin policy evaluation for AEX.
//!
//! [`kernel`] holds the pure capability-gate rules every request passes
//! through first; [`plugin`] is the static, lexically-ordered extension
//! registry; [`engine`] reduces both into one [`engine::PolicyDecision`]
//! with a reproducible `decision_hash`.

pub mod engine;
pub mod kernel;
pub mod plugin;

pub use engine::{evaluate_request, evaluate_response, PolicyDecision, TraceEntry};
pub use kernel::AgentCaps;
pub use plugin::{default_registry, Decision, PluginOutcome, PolicyContext, PolicyPlugin, PATCHABLE_KEYS};
