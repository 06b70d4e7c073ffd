//! Builds the upstream request body from the admitted, policy-patched
//! body, and rewrites response bodies back to the client-facing model
//! name so a provider's internal model id never leaks.

use r2e_router::RoutePlan;
use serde_json::Value;

/// `dimensions_denylist` is the operator-configured list of providers that
/// reject the `dimensions` field on embeddings requests (`AexModelsConfig::
/// dimensions_denylist`, reloadable via `/admin/reload_config`) — not a
/// hard-coded set, so a newly onboarded incompatible provider doesn't need
/// a recompile.
pub fn build_upstream_body(route: &RoutePlan, patched_body: &Value, dimensions_denylist: &[String]) -> Value {
    let mut body = patched_body.clone();
    if let Value::Object(ref mut map) = body {
        map.insert("model".to_string(), Value::String(route.provider_model.clone()));
        if route.upstream_path.ends_with("/embeddings")
            && dimensions_denylist.iter().any(|p| p == &route.provider_name)
        {
            map.remove("dimensions");
        }
    }
    body
}

/// Rewrite `model` in a successful response body to the name the client
/// requested with, never the provider's internal `provider_model`.
pub fn rewrite_response_model(route: &RoutePlan, mut body: Value) -> Value {
    if let Value::Object(ref mut map) = body {
        map.insert("model".to_string(), Value::String(route.requested_model.clone()));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn route() -> RoutePlan {
        RoutePlan {
            requested_model: "gpt-4o".to_string(),
            provider_name: "azure_openai_compat".to_string(),
            provider_model: "gpt-4o-2024".to_string(),
            base_url: "https://example.test".to_string(),
            upstream_path: "/embeddings".to_string(),
            route_hash: "hash".to_string(),
        }
    }

    fn denylist() -> Vec<String> {
        vec!["azure_openai_compat".to_string()]
    }

    #[test]
    fn rewrites_model_to_provider_model() {
        let body = build_upstream_body(&route(), &json!({"model": "gpt-4o", "input": "hi"}), &denylist());
        assert_eq!(body["model"], "gpt-4o-2024");
    }

    #[test]
    fn strips_dimensions_for_denylisted_provider() {
        let body = build_upstream_body(&route(), &json!({"input": "hi", "dimensions": 256}), &denylist());
        assert!(body.get("dimensions").is_none());
    }

    #[test]
    fn keeps_dimensions_for_other_providers() {
        let mut r = route();
        r.provider_name = "openai".to_string();
        let body = build_upstream_body(&r, &json!({"input": "hi", "dimensions": 256}), &denylist());
        assert_eq!(body["dimensions"], 256);
    }

    #[test]
    fn keeps_dimensions_when_denylist_is_empty() {
        let body = build_upstream_body(&route(), &json!({"input": "hi", "dimensions": 256}), &[]);
        assert_eq!(body["dimensions"], 256);
    }

    #[test]
    fn response_model_rewritten_to_client_facing_name() {
        let body = rewrite_response_model(&route(), json!({"model": "gpt-4o-2024"}));
        assert_eq!(body["model"], "gpt-4o");
    }
}
