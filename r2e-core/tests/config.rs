use r2e_core::config::{ConfigError, ConfigValue, R2eConfig};

#[test]
fn test_empty_config() {
    let config = R2eConfig::empty();
    assert!(config.get::<String>("nonexistent").is_err());
}

#[test]
fn test_set_and_get() {
    let mut config = R2eConfig::empty();
    config.set("app.name", ConfigValue::String("test".into()));
    assert_eq!(config.get::<String>("app.name").unwrap(), "test");
}

#[test]
fn test_get_or_default() {
    let config = R2eConfig::empty();
    assert_eq!(config.get_or("missing", 42i64), 42);
}

#[test]
fn test_type_conversions() {
    let mut config = R2eConfig::empty();
    config.set("int_val", ConfigValue::Integer(42));
    config.set("float_val", ConfigValue::Float(3.14));
    config.set("bool_val", ConfigValue::Bool(true));
    config.set("null_val", ConfigValue::Null);

    assert_eq!(config.get::<i64>("int_val").unwrap(), 42);
    assert_eq!(config.get::<f64>("float_val").unwrap(), 3.14);
    assert!(config.get::<bool>("bool_val").unwrap());
    assert_eq!(config.get::<String>("int_val").unwrap(), "42");
    assert!(config.get::<Option<String>>("null_val").unwrap().is_none());
}

#[test]
fn test_flatten_yaml() {
    let yaml = r#"
app:
  database:
    url: "postgres://localhost/aex"
    pool_size: 10
  name: "test"
"#;
    let config = R2eConfig::from_yaml_str(yaml, "test").unwrap();

    assert_eq!(
        config.get::<String>("app.database.url").unwrap(),
        "postgres://localhost/aex"
    );
    assert_eq!(config.get::<i64>("app.database.pool_size").unwrap(), 10);
    assert_eq!(config.get::<String>("app.name").unwrap(), "test");
}

#[test]
fn test_list_config() {
    let yaml = r#"
app:
  origins:
    - "http://localhost"
    - "https://prod.com"
"#;
    let config = R2eConfig::from_yaml_str(yaml, "test").unwrap();
    let origins: Vec<String> = config.get("app.origins").unwrap();
    assert_eq!(origins, vec!["http://localhost", "https://prod.com"]);
}

#[test]
fn test_list_indexed_access() {
    let yaml = r#"
app:
  features:
    - "replay"
    - "recovery"
"#;
    let config = R2eConfig::from_yaml_str(yaml, "test").unwrap();
    assert_eq!(config.get::<String>("app.features.0").unwrap(), "replay");
    assert_eq!(
        config.get::<String>("app.features.1").unwrap(),
        "recovery"
    );
}

#[test]
fn test_single_value_as_vec() {
    let mut config = R2eConfig::empty();
    config.set("single", ConfigValue::String("only-one".into()));
    let result: Vec<String> = config.get("single").unwrap();
    assert_eq!(result, vec!["only-one"]);
}

#[test]
fn test_contains_key() {
    let mut config = R2eConfig::empty();
    config.set("exists", ConfigValue::String("yes".into()));
    assert!(config.contains_key("exists"));
    assert!(!config.contains_key("nope"));
}

// =========================================================================
// FromConfigValue — numeric types
// =========================================================================

#[test]
fn test_from_config_value_u16() {
    let mut config = R2eConfig::empty();
    config.set("port", ConfigValue::Integer(8080));
    assert_eq!(config.get::<u16>("port").unwrap(), 8080);
}

#[test]
fn test_from_config_value_u32() {
    let mut config = R2eConfig::empty();
    config.set("count", ConfigValue::Integer(100_000));
    assert_eq!(config.get::<u32>("count").unwrap(), 100_000);
}

#[test]
fn test_from_config_value_u8() {
    let mut config = R2eConfig::empty();
    config.set("level", ConfigValue::Integer(255));
    assert_eq!(config.get::<u8>("level").unwrap(), 255);
}

#[test]
fn test_from_config_value_u8_out_of_range() {
    let mut config = R2eConfig::empty();
    config.set("level", ConfigValue::Integer(256));
    assert!(config.get::<u8>("level").is_err());
}

#[test]
fn test_from_config_value_i32() {
    let mut config = R2eConfig::empty();
    config.set("val", ConfigValue::Integer(-42));
    assert_eq!(config.get::<i32>("val").unwrap(), -42);
}

#[test]
fn test_from_config_value_usize() {
    let mut config = R2eConfig::empty();
    config.set("size", ConfigValue::Integer(1024));
    assert_eq!(config.get::<usize>("size").unwrap(), 1024);
}

#[test]
fn test_from_config_value_f32() {
    let mut config = R2eConfig::empty();
    config.set("ratio", ConfigValue::Float(1.5));
    let val = config.get::<f32>("ratio").unwrap();
    assert!((val - 1.5).abs() < f32::EPSILON);
}

#[test]
fn test_from_config_value_hashmap() {
    use std::collections::HashMap;
    // YAML loader flattens maps to dotted keys, so we set a Map value directly.
    let mut inner = HashMap::new();
    inner.insert("env".to_string(), ConfigValue::String("production".into()));
    inner.insert("region".to_string(), ConfigValue::String("us-east".into()));
    let mut config = R2eConfig::empty();
    config.set("labels", ConfigValue::Map(inner));

    let labels: HashMap<String, String> = config.get("labels").unwrap();
    assert_eq!(labels.get("env").unwrap(), "production");
    assert_eq!(labels.get("region").unwrap(), "us-east");
}

// =========================================================================
// ConfigError::Validation
// =========================================================================

#[test]
fn test_config_validation_error_display() {
    use r2e_core::config::ConfigValidationDetail;
    let err = ConfigError::Validation(vec![ConfigValidationDetail {
        key: "app.port".to_string(),
        message: "must be between 1 and 65535".to_string(),
    }]);
    let msg = err.to_string();
    assert!(msg.contains("app.port"));
    assert!(msg.contains("must be between 1 and 65535"));
}

// =========================================================================
// R2eConfig<T> — typed config with Deref access
// =========================================================================

#[derive(Clone, Debug)]
struct DatabaseConfig {
    url: String,
    pool_size: i64,
}

impl r2e_core::config::ConfigProperties for DatabaseConfig {
    fn prefix() -> &'static str {
        "app.database"
    }

    fn properties_metadata() -> Vec<r2e_core::config::PropertyMeta> {
        vec![
            r2e_core::config::PropertyMeta {
                key: "url".to_string(),
                full_key: "app.database.url".to_string(),
                type_name: "String",
                required: true,
                default_value: None,
                description: None,
            },
            r2e_core::config::PropertyMeta {
                key: "pool_size".to_string(),
                full_key: "app.database.pool_size".to_string(),
                type_name: "i64",
                required: false,
                default_value: Some("10".to_string()),
                description: None,
            },
        ]
    }

    fn from_config(config: &R2eConfig) -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: config.get("app.database.url")?,
            pool_size: config.get_or("app.database.pool_size", 10),
        })
    }
}

#[test]
fn test_with_typed_basic() {
    let yaml = r#"
app:
  database:
    url: "postgres://localhost/aex"
"#;
    let config = R2eConfig::from_yaml_str(yaml, "test")
        .unwrap()
        .with_typed::<DatabaseConfig>()
        .unwrap();

    // Typed access via Deref
    assert_eq!(config.url, "postgres://localhost/aex");
    assert_eq!(config.pool_size, 10); // default

    // Raw access still works
    assert_eq!(
        config.get::<String>("app.database.url").unwrap(),
        "postgres://localhost/aex"
    );
}

#[test]
fn test_with_typed_profile() {
    let yaml = r#"
app:
  database:
    url: "postgres://localhost/aex"
"#;
    let config = R2eConfig::from_yaml_str(yaml, "staging")
        .unwrap()
        .with_typed::<DatabaseConfig>()
        .unwrap();

    assert_eq!(config.profile(), "staging");
}

#[test]
fn test_with_typed_missing_required() {
    let config = R2eConfig::empty();
    let result = config.with_typed::<DatabaseConfig>();
    assert!(result.is_err());
}

#[test]
fn test_raw_downgrade() {
    let yaml = r#"
app:
  database:
    url: "postgres://localhost/aex"
"#;
    let typed_config = R2eConfig::from_yaml_str(yaml, "test")
        .unwrap()
        .with_typed::<DatabaseConfig>()
        .unwrap();

    let raw = typed_config.raw();
    assert_eq!(
        raw.get::<String>("app.database.url").unwrap(),
        "postgres://localhost/aex"
    );
    assert_eq!(raw.profile(), "test");
}

#[test]
fn test_typed_accessor() {
    let yaml = r#"
app:
  database:
    url: "postgres://localhost/aex"
"#;
    let config = R2eConfig::from_yaml_str(yaml, "test")
        .unwrap()
        .with_typed::<DatabaseConfig>()
        .unwrap();

    let db: &DatabaseConfig = config.typed();
    assert_eq!(db.url, "postgres://localhost/aex");
}
