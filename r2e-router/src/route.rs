//! Static endpoint → upstream-path and model → (provider, provider_model,
//! base_url) resolution.

use r2e_codec::{canonical_json_of, stable_hash_hex};
use serde::Serialize;

use crate::config::ConfigLoader;

#[derive(Debug, Clone, Serialize)]
pub struct RoutePlan {
    pub requested_model: String,
    pub provider_name: String,
    pub provider_model: String,
    pub base_url: String,
    pub upstream_path: String,
    pub route_hash: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Model '{0}' not allowed")]
    ModelNotAllowed(String),
    #[error("Provider '{0}' not configured")]
    ProviderNotConfigured(String),
    #[error("Unsupported endpoint '{0}'")]
    UnsupportedEndpoint(String),
}

fn endpoint_upstream_path(endpoint: &str) -> Option<&'static str> {
    match endpoint {
        "/v1/chat" | "/v1/chat/completions" | "/openai/v1/chat/completions" => Some("/chat/completions"),
        "/v1/responses" | "/openai/v1/responses" => Some("/responses"),
        "/v1/embeddings" | "/openai/v1/embeddings" => Some("/embeddings"),
        _ => None,
    }
}

#[derive(Serialize)]
struct RoutePayload<'a> {
    endpoint: &'a str,
    provider: &'a str,
    provider_model: &'a str,
    requested_model: &'a str,
    base_url: &'a str,
}

/// Resolve `(endpoint, model_name)` into a [`RoutePlan`] with a
/// reproducible `route_hash`.
pub fn resolve_route(config: &ConfigLoader, endpoint: &str, model_name: &str) -> Result<RoutePlan, RouteError> {
    let model = config
        .get_model(model_name)
        .ok_or_else(|| RouteError::ModelNotAllowed(model_name.to_string()))?;

    let provider = config
        .get_provider(&model.provider)
        .ok_or_else(|| RouteError::ProviderNotConfigured(model.provider.clone()))?;

    let upstream_path =
        endpoint_upstream_path(endpoint).ok_or_else(|| RouteError::UnsupportedEndpoint(endpoint.to_string()))?;

    let payload = RoutePayload {
        endpoint,
        provider: &model.provider,
        provider_model: &model.provider_model,
        requested_model: model_name,
        base_url: &provider.base_url,
    };
    let route_hash = stable_hash_hex([canonical_json_of(&payload).expect("route payload always serializes")]);

    Ok(RoutePlan {
        requested_model: model_name.to_string(),
        provider_name: model.provider,
        provider_model: model.provider_model,
        base_url: provider.base_url,
        upstream_path: upstream_path.to_string(),
        route_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &std::path::Path) -> ConfigLoader {
        let yaml = r#"
version: 1
providers:
  openai:
    base_url: "https://api.openai.com/v1"
    type: openai_compatible
models:
  gpt-4o:
    provider: openai
    provider_model: gpt-4o
    pricing:
      input_micro: 50
      output_micro: 100
    limits:
      max_tokens: 4096
    capabilities:
      tools: true
"#;
        let path = dir.join("models.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        ConfigLoader::load(path).unwrap()
    }

    #[test]
    fn resolves_known_model_and_endpoint() {
        let dir = tempdir();
        let loader = write_config(dir.path());
        let plan = resolve_route(&loader, "/v1/chat/completions", "gpt-4o").unwrap();
        assert_eq!(plan.provider_name, "openai");
        assert_eq!(plan.upstream_path, "/chat/completions");
        assert_eq!(plan.route_hash.len(), 64);
    }

    #[test]
    fn unknown_model_is_rejected() {
        let dir = tempdir();
        let loader = write_config(dir.path());
        let err = resolve_route(&loader, "/v1/chat/completions", "nope").unwrap_err();
        assert!(matches!(err, RouteError::ModelNotAllowed(_)));
    }

    #[test]
    fn unsupported_endpoint_is_rejected() {
        let dir = tempdir();
        let loader = write_config(dir.path());
        let err = resolve_route(&loader, "/v1/unsupported", "gpt-4o").unwrap_err();
        assert!(matches!(err, RouteError::UnsupportedEndpoint(_)));
    }

    fn tempdir() -> TempDir {
        TempDir::new()
    }

    struct TempDir(std::path::PathBuf);

    impl TempDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!("aex-router-test-{}", std::process::id()));
            let _ = std::fs::create_dir_all(&path);
            Self(path)
        }

        fn path(&self) -> &std::path::Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
