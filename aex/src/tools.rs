//! Tool execution: a registry-backed `ToolPlugin` trait whose default
//! implementation returns a flat-cost stub result. Real sandboxed
//! execution is an external collaborator (spec §1); this crate only
//! owns admission/settlement bookkeeping for `/v1/tools/execute`.

use serde_json::{json, Value};

/// Flat cost charged for a tool invocation that doesn't carry its own
/// token-priced usage, in micro-USD. Distinct from chat/responses/
/// embeddings pricing, which is model-priced per token.
pub const DEFAULT_TOOL_COST_MICRO: i64 = 100;

/// One registered tool. Mirrors the `tool_plugins` table: a name-keyed,
/// sha256-identified artifact plus a manifest describing its shape.
pub trait ToolPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Execute the tool against the given arguments. The default stub
    /// used when no real plugin is registered for a name: a flat-cost,
    /// deterministic placeholder result that still moves money through
    /// the ledger the same way a real invocation would.
    fn execute(&self, arguments: &Value) -> ToolOutcome;
}

pub struct ToolOutcome {
    pub result: Value,
    pub cost_micro: i64,
}

/// The default, in-tree stub: echoes the call back with a flat cost.
/// Operators wire a real `ToolPlugin` per registered tool; this is the
/// fallback used when no such plugin exists for the requested name.
pub struct StubToolPlugin {
    name: String,
}

impl StubToolPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ToolPlugin for StubToolPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        ToolOutcome {
            result: json!({
                "tool_name": self.name,
                "status": "stub_executed",
                "arguments_echo": arguments,
            }),
            cost_micro: DEFAULT_TOOL_COST_MICRO,
        }
    }
}

/// Look up a registered plugin by name, falling back to the flat-cost
/// stub for any name not found in `tool_plugins` — matching the table's
/// role as a registry rather than a hard allowlist (capability gating
/// for tool names already happened in the policy kernel).
pub fn resolve(tool_name: &str) -> Box<dyn ToolPlugin> {
    Box::new(StubToolPlugin::new(tool_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_plugin_charges_flat_cost() {
        let plugin = resolve("search");
        let outcome = plugin.execute(&json!({"query": "rust"}));
        assert_eq!(outcome.cost_micro, DEFAULT_TOOL_COST_MICRO);
        assert_eq!(outcome.result["tool_name"], "search");
    }
}
