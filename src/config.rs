//! Configuration for the saga coordinator.
//!
//! Supports a YAML file plus environment variable overrides, following
//! `angzarr::config::Config`'s `load()`/`from_file()`/env-override shape
//! rather than the original Go project's TOML+YAML dual-parser.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    FileRead(String, String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Log verbosity, mirrors spec §6 `log.level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Log output formatter, mirrors spec §6 `log.formatter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatter {
    Text,
    Json,
}

impl Default for LogFormatter {
    fn default() -> Self {
        LogFormatter::Text
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub formatter: LogFormatter,
    /// Static key/value fields attached to every log line.
    pub fields: std::collections::HashMap<String, serde_json::Value>,
}

/// HTTP listen address. The HTTP surface itself is external to this crate
/// (spec §1 Non-goals); this field is carried so a complete config file
/// round-trips through whatever process embeds the coordinator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: ":8889".to_string(),
        }
    }
}

/// Discriminated union selecting the `Hub` backend (spec §6 `hub_provider`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct HubProviderConfig {
    #[serde(rename = "type")]
    pub provider: HubProviderKind,
    pub streaming: StreamingHubConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubProviderKind {
    InMemory,
    Streaming,
}

impl Default for HubProviderKind {
    fn default() -> Self {
        HubProviderKind::InMemory
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StreamingHubConfig {
    pub cluster_id: String,
    pub server_url: String,
    pub client_id: String,
    pub durable_name: String,
}

/// Durable storage backend selection (spec §6 `storage`: "driver name,
/// open-ended").
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub driver: String,
    /// Path to a database file, meaningful for file-backed drivers.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: "memory".to_string(),
            path: "./data/sake.db".to_string(),
        }
    }
}

/// Cadence for the expiration scanner (spec §4.4).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExpirationConfig {
    #[serde(with = "humantime_secs")]
    pub interval: Duration,
    #[serde(with = "humantime_secs")]
    pub warm_up: Duration,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            warm_up: Duration::from_secs(5),
        }
    }
}

/// Cadence for the `ClearInactive` recipe cleanup task (spec §4.5).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    #[serde(with = "humantime_secs")]
    pub interval: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Top-level configuration (spec §6 "Configuration (enumerated)").
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub http: HttpConfig,
    pub hub_provider: HubProviderConfig,
    pub storage: StorageConfig,
    pub expiration: ExpirationConfig,
    pub cleanup: CleanupConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest): environment variables, config file,
    /// defaults. The file path is resolved from `SAKE_CONFIG_PATH`, falling
    /// back to `sake.yaml` in the current directory.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("SAKE_CONFIG_PATH").unwrap_or_else(|_| "sake.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("SAKE_LOG_LEVEL") {
            self.log.level = match level.to_lowercase().as_str() {
                "error" => LogLevel::Error,
                "warn" => LogLevel::Warn,
                "debug" => LogLevel::Debug,
                _ => LogLevel::Info,
            };
        }

        if let Ok(format) = std::env::var("SAKE_LOG_FORMAT") {
            self.log.formatter = match format.to_lowercase().as_str() {
                "json" => LogFormatter::Json,
                _ => LogFormatter::Text,
            };
        }

        if let Ok(addr) = std::env::var("SAKE_HTTP_ADDR") {
            self.http.addr = addr;
        }

        if let Ok(driver) = std::env::var("SAKE_STORAGE") {
            self.storage.driver = driver;
        }
    }
}

/// `Duration` <-> whole-seconds (de)serialization for YAML readability.
mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
