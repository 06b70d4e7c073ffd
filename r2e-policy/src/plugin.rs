//! Static policy plugin registry.
//!
//! The original daemon loaded `*.py` files from a directory at runtime, in
//! lexical filename order, and called an `evaluate(context)` duck-typed
//! function on each. That is dynamic code loading, which has no safe Rust
//! equivalent and is explicitly redesigned here: plugins are ordinary
//! `PolicyPlugin` implementations, registered once at process startup in
//! [`default_registry`] and evaluated in the same lexical-name order the
//! original gave its directory scan.

use serde_json::Value;

/// A single plugin's verdict for one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    Abstain,
}

/// Inputs available to a plugin: the agent's capability row (as JSON, so
/// plugins don't depend on `r2e_ledger`), the request body, and routing
/// context.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub agent_name: String,
    pub agent_scope: String,
    pub agent_caps: Value,
    pub request: Value,
    pub model: String,
    pub endpoint: String,
    pub execution_id: String,
}

/// A plugin's structured outcome.
#[derive(Debug, Clone, Default)]
pub struct PluginOutcome {
    pub decision: Option<Decision>,
    pub reason: Option<String>,
    pub patch: serde_json::Map<String, Value>,
    pub obligations: Vec<Value>,
}

impl PluginOutcome {
    pub fn allow() -> Self {
        Self {
            decision: Some(Decision::Allow),
            ..Default::default()
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Some(Decision::Deny),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn abstain() -> Self {
        Self {
            decision: Some(Decision::Abstain),
            ..Default::default()
        }
    }
}

/// A statically-registered policy plugin, evaluated after the kernel
/// rules pass.
pub trait PolicyPlugin: Send + Sync {
    /// Stable name, used for registry ordering and trace entries — plays
    /// the role the original's filename stem played.
    fn name(&self) -> &str;

    fn evaluate(&self, ctx: &PolicyContext) -> PluginOutcome;
}

/// Only whitelisted keys may be written by a plugin `patch` — mirrors the
/// admission controller's whitelist in the original daemon.
pub const PATCHABLE_KEYS: &[&str] = &["max_tokens", "temperature", "top_p", "stream", "tool_choice"];

/// Build the static plugin registry, sorted by [`PolicyPlugin::name`] so
/// evaluation order is deterministic and reproducible across processes.
///
/// Empty by default: this gateway ships no built-in plugins, only the
/// seam. Operators add implementations of [`PolicyPlugin`] and register
/// them here.
pub fn default_registry() -> Vec<Box<dyn PolicyPlugin>> {
    let mut plugins: Vec<Box<dyn PolicyPlugin>> = Vec::new();
    plugins.sort_by(|a, b| a.name().cmp(b.name()));
    plugins
}
