pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod secure_headers;
pub mod service;

pub use config::{
    ConfigError, ConfigProperties, ConfigValidationError, ConfigValue, DefaultSecretResolver,
    FromConfigValue, MissingKeyError, PropertyMeta, R2eConfig, RegisteredSection, SecretResolver,
    register_section, registered_sections, validate_keys, validate_section,
};
pub use error::HttpError;
pub use secure_headers::{SecureHeaders, SecureHeadersLayer};
pub use service::ServiceComponent;
