//! Static model/provider routing and pricing config for AEX.

pub mod config;
pub mod route;

pub use config::{AexModelsConfig, ConfigError, ConfigLoader, ModelCapabilities, ModelConfig, ModelLimits, ModelPricing, ProviderConfig};
pub use route::{resolve_route, RouteError, RoutePlan};
