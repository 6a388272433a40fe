//! Configuration management for the limiter process.
//!
//! Values come from an optional YAML file and `SENTINEL__*` environment
//! variables, e.g. `SENTINEL__STORE__URL=redis://cache:6379`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LimiterError, Result};
use crate::ratelimit::FailurePolicy;

/// Main configuration for the limiter process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Shared state store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Configuration publication settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which store implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process memory, not shared between instances
    Memory,
    #[default]
    Redis,
}

/// Shared state store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis URL (e.g., redis://localhost:6379)
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Per-operation timeout in milliseconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            connect_timeout_ms: default_connect_timeout(),
            operation_timeout_ms: default_operation_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_operation_timeout() -> u64 {
    250
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Prefix for every key the limiter reads or writes
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// How the CLI collapses an engine error into a decision. Unset means the
    /// error is reported instead.
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            failure_policy: None,
        }
    }
}

fn default_key_prefix() -> String {
    "rate_limit".to_string()
}

/// Configuration publication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Path to the rate limit rules file
    pub rules_path: Option<String>,

    /// Republish interval in seconds
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            interval_secs: default_sync_interval(),
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Lifetime of synced config records: two intervals, so one failed round
    /// keeps rules in place and a rule removed from the file expires.
    pub fn record_ttl(&self) -> Duration {
        self.interval() * 2
    }
}

fn default_sync_interval() -> u64 {
    300
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from an optional file path plus the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder
            .add_source(
                config::Environment::with_prefix("SENTINEL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LimiterError::Config(e.to_string()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LimiterError::Config(e.to_string()))
    }
}
