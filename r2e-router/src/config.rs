//! Model/provider pricing configuration (`AEX_CONFIG_PATH`, a YAML file
//! distinct from the teacher's generic `R2eConfig`).
//!
//! Reload is atomic: a new file is parsed into a scratch [`AexModelsConfig`]
//! and only swapped into the live `RwLock<Arc<_>>` on success, matching the
//! original `ConfigLoader.load_config`'s "previous config retained on
//! failure" contract.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCapabilities {
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub tools: bool,
    #[serde(default)]
    pub vision: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_micro: i64,
    pub output_micro: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelLimits {
    pub max_tokens: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub provider_model: String,
    pub pricing: ModelPricing,
    pub limits: ModelLimits,
    #[serde(default)]
    pub capabilities: ModelCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(rename = "type")]
    pub provider_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AexModelsConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub providers: HashMap<String, ProviderConfig>,
    pub models: HashMap<String, ModelConfig>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Providers that reject the `dimensions` field on embeddings
    /// requests; the field is stripped before dispatch for any provider
    /// named here. Operator-configurable so a newly onboarded
    /// incompatible provider doesn't need a recompile.
    #[serde(default = "default_dimensions_denylist")]
    pub dimensions_denylist: Vec<String>,
}

fn default_version() -> u32 {
    1
}

fn default_dimensions_denylist() -> Vec<String> {
    vec!["azure_openai_compat".to_string()]
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    NotFound(PathBuf),
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] serde_yaml::Error),
    #[error("default_model '{0}' not found in models list")]
    DefaultModelMissing(String),
}

impl AexModelsConfig {
    fn validate(self) -> Result<Self, ConfigError> {
        if let Some(default_model) = &self.default_model {
            if !self.models.contains_key(default_model) {
                return Err(ConfigError::DefaultModelMissing(default_model.clone()));
            }
        }
        Ok(self)
    }

    fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let parsed: AexModelsConfig = serde_yaml::from_str(&raw)?;
        parsed.validate()
    }
}

/// Holds the live, reloadable config behind a `RwLock<Arc<_>>` so readers
/// never block on a concurrent reload and a reload never tears a reader's
/// view of the config mid-read.
pub struct ConfigLoader {
    path: PathBuf,
    config: RwLock<Arc<AexModelsConfig>>,
}

impl ConfigLoader {
    /// Load the initial configuration. Fails hard — there is no previous
    /// config to fall back to on first boot.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = AexModelsConfig::load_from_path(&path)?;
        tracing::info!(
            path = %path.display(),
            version = config.version,
            models = config.models.len(),
            "loaded AEX model/provider configuration"
        );
        Ok(Self {
            path,
            config: RwLock::new(Arc::new(config)),
        })
    }

    /// Current configuration snapshot. Cheap: an `Arc` clone.
    pub fn current(&self) -> Arc<AexModelsConfig> {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Re-read and re-validate the file, swapping the live pointer only on
    /// success. On failure the previous configuration remains live and the
    /// error is returned to the caller (the `/admin/reload_config` handler
    /// reports it without restarting the process).
    pub fn reload(&self) -> Result<(), ConfigError> {
        let new_config = AexModelsConfig::load_from_path(&self.path)?;
        let mut guard = self.config.write().expect("config lock poisoned");
        tracing::info!(
            path = %self.path.display(),
            version = new_config.version,
            models = new_config.models.len(),
            "reloaded AEX model/provider configuration"
        );
        *guard = Arc::new(new_config);
        Ok(())
    }

    pub fn get_model(&self, model_name: &str) -> Option<ModelConfig> {
        self.current().models.get(model_name).cloned()
    }

    pub fn get_provider(&self, provider_name: &str) -> Option<ProviderConfig> {
        self.current().providers.get(provider_name).cloned()
    }

    /// Providers currently configured to reject the `dimensions` field on
    /// embeddings requests. Reload-aware like every other accessor here.
    pub fn dimensions_denylist(&self) -> Vec<String> {
        self.current().dimensions_denylist.clone()
    }

    pub fn default_model(&self) -> Option<String> {
        let config = self.current();
        config
            .default_model
            .clone()
            .or_else(|| config.models.keys().next().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_default_model_not_in_models() {
        let config = AexModelsConfig {
            version: 1,
            providers: HashMap::new(),
            models: HashMap::new(),
            default_model: Some("missing".to_string()),
            dimensions_denylist: default_dimensions_denylist(),
        };
        assert!(matches!(config.validate(), Err(ConfigError::DefaultModelMissing(_))));
    }
}
