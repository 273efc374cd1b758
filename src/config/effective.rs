//! Effective configuration with provenance
//!
//! Captures the merged configuration document plus the sources that
//! contributed to it, in precedence order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::debug;

use super::build_config::BuildConfig;
use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;

/// Schema version for effective_config
pub const SCHEMA_VERSION: u32 = 1;

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    User,
    Project,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged configuration with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,

    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Build effective config from layers.
    ///
    /// Missing files are skipped; a file that exists but cannot be read or
    /// parsed is an error.
    pub fn build(
        user_config_path: Option<&Path>,
        project_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        for (origin, path) in [
            (ConfigOrigin::User, user_config_path),
            (ConfigOrigin::Project, project_config_path),
        ] {
            let Some(path) = path.filter(|p| p.exists()) else {
                continue;
            };
            let (value, digest) = Self::load_toml_file(path)?;
            debug!(path = %path.display(), ?origin, "config layer loaded");
            layers.push(value);
            sources.push(ConfigSource {
                origin,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        Self::validate_config(&merged)?;

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            created_at: Utc::now(),
            config: merged,
            sources,
        })
    }

    /// Deserialize the merged document into the typed configuration.
    ///
    /// Unknown keys are rejected so a misspelled option never goes unnoticed.
    pub fn build_config(&self) -> Result<BuildConfig, ConfigError> {
        serde_json::from_value(self.config.clone())
            .map_err(|e| ConfigError::Schema(e.to_string()))
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let display = path.display().to_string();
        let bytes = fs::read(path).map_err(|e| ConfigError::Io {
            path: display.clone(),
            message: e.to_string(),
        })?;

        let digest = hex::encode(Sha256::digest(&bytes));

        let contents = String::from_utf8(bytes).map_err(|e| ConfigError::Parse {
            path: display.clone(),
            message: format!("invalid UTF-8: {}", e),
        })?;

        let toml_value: toml::Value = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: display,
            message: e.to_string(),
        })?;

        Ok((toml_to_json(toml_value), digest))
    }

    /// Check numeric bounds before typed deserialization
    fn validate_config(config: &Value) -> Result<(), ConfigError> {
        let bounded = [
            ("fetch.max_attempts", 1, 10),
            ("fetch.parallelism", 1, 32),
            ("fetch.connect_timeout_seconds", 1, 300),
            ("fetch.request_timeout_seconds", 1, 86400),
            ("cache.lock_timeout_seconds", 1, 86400),
            ("cache.stale_lock_seconds", 1, 7 * 86400),
        ];
        for (key, min, max) in bounded {
            if let Some(value) = lookup(config, key).and_then(Value::as_u64) {
                if value < min || value > max {
                    return Err(ConfigError::Validation(format!(
                        "{} must be in [{}, {}], got {}",
                        key, min, max, value
                    )));
                }
            }
        }

        let initial = lookup(config, "fetch.initial_backoff_ms").and_then(Value::as_u64);
        let max = lookup(config, "fetch.max_backoff_ms").and_then(Value::as_u64);
        if let (Some(initial), Some(max)) = (initial, max) {
            if initial > max {
                return Err(ConfigError::Validation(format!(
                    "fetch.initial_backoff_ms ({}) must not exceed fetch.max_backoff_ms ({})",
                    initial, max
                )));
            }
        }

        Ok(())
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get a config value by path (dot-separated)
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.config, path)
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(|v| v.as_bool())
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, part| current.get(part))
}

/// Convert a TOML value to JSON
pub fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {message}")]
    Io { path: String, message: String },

    #[error("invalid TOML in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("unsupported configuration: {0}")]
    Schema(String),
}
