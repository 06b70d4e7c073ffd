//! Deterministic policy evaluation pipeline (kernel + plugins).

use r2e_codec::{canonical_json, stable_hash_hex};
use serde_json::{json, Map, Value};

use crate::kernel::{self, AgentCaps};
use crate::plugin::{Decision, PolicyContext, PolicyPlugin, PATCHABLE_KEYS};

/// One plugin (or the kernel) contributing to the trace.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub stage: String,
    pub decision: String,
    pub reason: Option<String>,
}

impl TraceEntry {
    fn to_json(&self) -> Value {
        json!({"stage": self.stage, "decision": self.decision, "reason": self.reason})
    }
}

/// Final decision for one request: kernel + plugin evaluation, reduced.
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub allow: bool,
    pub reason: Option<String>,
    pub obligations: Vec<Value>,
    pub patch: Map<String, Value>,
    pub decision_hash: String,
    pub plugin_trace: Vec<TraceEntry>,
}

fn build_hash(trace: &[TraceEntry], allow: bool, reason: &Option<String>, patch: &Map<String, Value>) -> String {
    let trace_json: Vec<Value> = trace.iter().map(TraceEntry::to_json).collect();
    let payload = json!({
        "allow": allow,
        "reason": reason,
        "trace": trace_json,
        "patch": patch,
    });
    stable_hash_hex([canonical_json(&payload)])
}

/// Evaluate kernel rules, then the static plugin registry in order.
///
/// Reducer: any explicit deny — kernel's or a plugin's — wins immediately;
/// otherwise the request is allowed. Plugin patches merge in
/// lexical-key order, restricted to [`crate::plugin::PATCHABLE_KEYS`].
#[allow(clippy::too_many_arguments)]
pub fn evaluate_request(
    caps: &AgentCaps,
    payload: &Value,
    model_name: &str,
    endpoint: &str,
    execution_id: &str,
    registry: &[Box<dyn PolicyPlugin>],
) -> PolicyDecision {
    let mut trace = Vec::new();
    let mut obligations = Vec::new();
    let mut merged_patch = Map::new();

    let kernel_verdict = kernel::validate_request(caps, payload, model_name);
    trace.push(TraceEntry {
        stage: "kernel".to_string(),
        decision: if kernel_verdict.is_none() { "allow" } else { "deny" }.to_string(),
        reason: kernel_verdict.clone(),
    });
    if let Some(reason) = kernel_verdict {
        let decision_hash = build_hash(&trace, false, &Some(reason.clone()), &merged_patch);
        return PolicyDecision {
            allow: false,
            reason: Some(reason),
            obligations,
            patch: merged_patch,
            decision_hash,
            plugin_trace: trace,
        };
    }

    let ctx = PolicyContext {
        agent_name: caps.name.clone(),
        agent_scope: caps.token_scope.clone(),
        agent_caps: serde_json::to_value(caps).unwrap_or(Value::Null),
        request: payload.clone(),
        model: model_name.to_string(),
        endpoint: endpoint.to_string(),
        execution_id: execution_id.to_string(),
    };

    for plugin in registry {
        let outcome = plugin.evaluate(&ctx);
        obligations.extend(outcome.obligations.clone());

        let mut keys: Vec<&String> = outcome.patch.keys().collect();
        keys.sort();
        for key in keys {
            if PATCHABLE_KEYS.contains(&key.as_str()) {
                merged_patch.insert(key.clone(), outcome.patch[key].clone());
            }
        }

        let decision_label = match outcome.decision {
            Some(Decision::Allow) | None => "allow",
            Some(Decision::Deny) => "deny",
            Some(Decision::Abstain) => "abstain",
        };
        trace.push(TraceEntry {
            stage: plugin.name().to_string(),
            decision: decision_label.to_string(),
            reason: outcome.reason.clone(),
        });

        if outcome.decision == Some(Decision::Deny) {
            let reason = outcome
                .reason
                .unwrap_or_else(|| format!("Denied by plugin '{}'", plugin.name()));
            let decision_hash = build_hash(&trace, false, &Some(reason.clone()), &merged_patch);
            return PolicyDecision {
                allow: false,
                reason: Some(reason),
                obligations,
                patch: merged_patch,
                decision_hash,
                plugin_trace: trace,
            };
        }
    }

    let decision_hash = build_hash(&trace, true, &None, &merged_patch);
    PolicyDecision {
        allow: true,
        reason: None,
        obligations,
        patch: merged_patch,
        decision_hash,
        plugin_trace: trace,
    }
}

/// Post-flight check: kernel only, no plugin fan-out in the original.
pub fn evaluate_response(caps: &AgentCaps, response: &Value) -> Option<String> {
    kernel::validate_response(caps, response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_with_no_plugins_has_stable_hash() {
        let caps = AgentCaps {
            allow_streaming: true,
            allow_tools: true,
            allow_function_calling: true,
            ..Default::default()
        };
        let a = evaluate_request(&caps, &json!({}), "gpt-4o", "chat", "exec-1", &[]);
        let b = evaluate_request(&caps, &json!({}), "gpt-4o", "chat", "exec-1", &[]);
        assert!(a.allow);
        assert_eq!(a.decision_hash, b.decision_hash);
    }

    #[test]
    fn kernel_deny_short_circuits_before_plugins() {
        let caps = AgentCaps {
            allow_streaming: false,
            ..Default::default()
        };
        let decision = evaluate_request(&caps, &json!({"stream": true}), "gpt-4o", "chat", "exec-2", &[]);
        assert!(!decision.allow);
        assert_eq!(decision.plugin_trace.len(), 1);
    }
}
