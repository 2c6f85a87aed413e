//! Configuration loading

use anyhow::{Context, Result};
use hearth_core::{CacheNodeDefinition, CacheSettings, CoreError, FieldKind, FieldSpec};
use hearth_db::FieldMap;
use hearth_tier::RedisTierConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub redis: TierConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// Cache tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// "redis" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(flatten)]
    pub connection: RedisTierConfig,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            connection: RedisTierConfig::default(),
        }
    }
}

/// Record store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_bind")]
    pub bind_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_metrics_bind(),
        }
    }
}

/// A field entry: either a bare name or a `{ name, kind }` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldConfig {
    Name(String),
    Typed {
        name: String,
        #[serde(default)]
        kind: FieldKind,
    },
}

impl From<&FieldConfig> for FieldSpec {
    fn from(field: &FieldConfig) -> Self {
        match field {
            FieldConfig::Name(name) => FieldSpec::new(name.clone()),
            FieldConfig::Typed { name, kind } => FieldSpec::typed(name.clone(), *kind),
        }
    }
}

/// One `[[nodes]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub active_ttl_secs: Option<u64>,
    #[serde(default)]
    pub inactive_threshold_secs: Option<u64>,
    #[serde(default)]
    pub defaults: FieldMap,
    #[serde(default)]
    pub sync_events: Vec<String>,
    #[serde(default)]
    pub identifier_keys: Option<Vec<String>>,
}

impl NodeConfig {
    /// Build the node definition, taking unset lifetimes from `settings`
    pub fn definition(&self, settings: &CacheSettings) -> Result<CacheNodeDefinition, CoreError> {
        let mut builder = CacheNodeDefinition::builder(self.name.clone())
            .settings(settings)
            .fields(self.fields.iter().map(FieldSpec::from));

        if let Some(ttl) = self.ttl_secs {
            builder = builder.ttl(ttl);
        }
        if let Some(ttl) = self.active_ttl_secs {
            builder = builder.active_ttl(ttl);
        }
        if let Some(threshold) = self.inactive_threshold_secs {
            builder = builder.inactive_threshold(threshold);
        }
        for (field, value) in &self.defaults {
            builder = builder.default_value(field.clone(), value.clone());
        }
        for event in &self.sync_events {
            builder = builder.sync_event(event.clone());
        }
        if let Some(keys) = &self.identifier_keys {
            builder = builder.identifier_keys(keys.iter().cloned());
        }

        builder.build()
    }
}

fn default_backend() -> String {
    "redis".to_string()
}

fn default_db_path() -> String {
    "./data/hearth.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_bind() -> String {
    "0.0.0.0:9000".to_string()
}

impl Config {
    /// Load configuration from file, falling back to defaults if it is absent
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_db::FieldValue;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load(path.to_str().unwrap()).unwrap();

        assert_eq!(config.redis.backend, "redis");
        assert_eq!(config.redis.connection.port, 6379);
        assert_eq!(config.cache, CacheSettings::default());
        assert!(config.nodes.is_empty());
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_full_config() {
        let file = write_config(
            r#"
            [redis]
            backend = "memory"
            host = "cache.internal"
            port = 6380
            password = "secret"

            [database]
            path = "/var/lib/hearth/records.db"

            [cache]
            ttl_secs = 60
            active_ttl_secs = 300
            bridge_channel = "game:bridge"

            [logging]
            format = "json"

            [[nodes]]
            name = "profile"
            fields = ["coins", "level", { name = "vip", kind = "boolean" }]
            inactive_threshold_secs = 120
            sync_events = ["coins_update"]
            defaults = { coins = 0, level = 1, vip = false }
            "#,
        );

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.redis.backend, "memory");
        assert_eq!(config.redis.connection.host, "cache.internal");
        assert_eq!(config.redis.connection.port, 6380);
        assert_eq!(config.redis.connection.max_connect_attempts, 20);
        assert_eq!(config.database.path, "/var/lib/hearth/records.db");
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.sync_interval_secs, 300);
        assert_eq!(config.cache.bridge_channel, "game:bridge");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");

        let definition = config.nodes[0].definition(&config.cache).unwrap();
        assert_eq!(definition.name(), "profile");
        assert_eq!(definition.fields().len(), 3);
        assert_eq!(definition.field("vip").unwrap().kind, FieldKind::Boolean);
        assert_eq!(definition.policy().ttl, 60);
        assert_eq!(definition.policy().active_ttl, 300);
        assert_eq!(definition.policy().inactive_threshold, 120);
        assert_eq!(definition.defaults()["level"], FieldValue::Integer(1));
        assert!(definition.handles_event("coins_update"));
    }

    #[test]
    fn test_invalid_node_definition() {
        let file = write_config(
            r#"
            [[nodes]]
            name = "profile"
            fields = ["coins"]
            defaults = { gems = 3 }
            "#,
        );

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert!(config.nodes[0].definition(&config.cache).is_err());
    }

    #[test]
    fn test_zero_node_lifetime_is_rejected() {
        let file = write_config(
            r#"
            [[nodes]]
            name = "profile"
            fields = ["coins"]
            ttl_secs = 0
            "#,
        );

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        let err = config.nodes[0].definition(&config.cache).unwrap_err();
        assert!(err.to_string().contains("ttl to 0"));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let file = write_config("[cache\nttl_secs = ");
        let err = Config::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
