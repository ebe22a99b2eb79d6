//! Configuration for validation, parsing, tiering, the artifact store, and timeouts.
//!
//! All sections deserialize with defaults, so an empty TOML file (or no file at all) yields a
//! working configuration. [`IngestConfig::load`] layers defaults, an optional TOML file, and
//! `TABULAR_`-prefixed environment variables (`TABULAR_STORE__MAX_ENTRIES=500`).

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ingestion::ParseOptions;
use crate::logging::LogConfig;

/// Configuration loading/validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Validation gate configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Largest accepted upload, in bytes.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Extensions accepted by the gate (without the dot, case-insensitive).
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Extensions always rejected, even if also allowed.
    #[serde(default = "default_denied_extensions")]
    pub denied_extensions: Vec<String>,
}

fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    ["csv", "json", "xlsx", "xls", "xml", "txt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_denied_extensions() -> Vec<String> {
    [
        "exe", "dll", "bat", "cmd", "com", "msi", "sh", "ps1", "vbs", "js", "jar", "scr",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            allowed_extensions: default_allowed_extensions(),
            denied_extensions: default_denied_extensions(),
        }
    }
}

impl ValidationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_file_bytes == 0 {
            return Err("validation.max_file_bytes must be > 0".to_string());
        }
        if self.allowed_extensions.is_empty() {
            return Err("validation.allowed_extensions must not be empty".to_string());
        }
        Ok(())
    }
}

/// Storage tiering thresholds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieringConfig {
    /// Datasets with more rows than this go to the row store.
    #[serde(default = "default_max_rows_for_inline")]
    pub max_rows_for_inline: u64,
    /// Datasets larger than this (bytes of the upload) go to the row store.
    #[serde(default = "default_max_bytes_for_inline")]
    pub max_bytes_for_inline: u64,
    /// Number of rows kept as a preview, regardless of tier.
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
}

fn default_max_rows_for_inline() -> u64 {
    1000
}

fn default_max_bytes_for_inline() -> u64 {
    5 * 1024 * 1024
}

fn default_preview_rows() -> usize {
    100
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            max_rows_for_inline: default_max_rows_for_inline(),
            max_bytes_for_inline: default_max_bytes_for_inline(),
            preview_rows: default_preview_rows(),
        }
    }
}

/// Bounded artifact store limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Entry-count ceiling enforced by eviction.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Largest single payload accepted by `put`.
    #[serde(default = "default_max_item_bytes")]
    pub max_item_bytes: u64,
    /// Cumulative byte budget. Tracked always, enforced only with `enforce_total_bytes`.
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,
    #[serde(default)]
    pub enforce_total_bytes: bool,
    /// Entries not read for this long are evicted.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Period of the background eviction task.
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
    /// Upper bound on concurrently executing store operations.
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,
    /// Budget for a single store operation, including the wait for a permit.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

fn default_max_entries() -> usize {
    1000
}

fn default_max_item_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_max_total_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_retention_secs() -> u64 {
    3600 // 1 hour
}

fn default_eviction_interval_secs() -> u64 {
    60
}

fn default_max_concurrent_operations() -> usize {
    32
}

fn default_operation_timeout_ms() -> u64 {
    5_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_item_bytes: default_max_item_bytes(),
            max_total_bytes: default_max_total_bytes(),
            enforce_total_bytes: false,
            retention_secs: default_retention_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
            max_concurrent_operations: default_max_concurrent_operations(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("store.max_entries must be > 0".to_string());
        }
        if self.max_item_bytes == 0 {
            return Err("store.max_item_bytes must be > 0".to_string());
        }
        if self.max_concurrent_operations == 0 {
            return Err("store.max_concurrent_operations must be > 0".to_string());
        }
        if self.eviction_interval_secs == 0 {
            return Err("store.eviction_interval_secs must be > 0".to_string());
        }
        if self.operation_timeout_ms == 0 {
            return Err("store.operation_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

/// Simulated store failures. Disabled unless a probability is set explicitly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultInjectionConfig {
    /// Probability that a `put` fails as if the store were full.
    #[serde(default)]
    pub store_full_probability: f64,
    /// Probability that a `get` fails as if the payload were unreadable.
    #[serde(default)]
    pub corruption_probability: f64,
    /// Seed for the random source. `None` seeds from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl FaultInjectionConfig {
    pub fn is_enabled(&self) -> bool {
        self.store_full_probability > 0.0 || self.corruption_probability > 0.0
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, p) in [
            ("store_full_probability", self.store_full_probability),
            ("corruption_probability", self.corruption_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("faults.{name} must be within [0, 1], got {p}"));
            }
        }
        Ok(())
    }
}

/// Stage time budgets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Metadata and read operations.
    #[serde(default = "default_short_timeout_ms")]
    pub short_ms: u64,
    /// Full-file parse and persist operations.
    #[serde(default = "default_long_timeout_secs")]
    pub long_secs: u64,
}

fn default_short_timeout_ms() -> u64 {
    5_000
}

fn default_long_timeout_secs() -> u64 {
    300 // 5 minutes
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            short_ms: default_short_timeout_ms(),
            long_secs: default_long_timeout_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn short(&self) -> Duration {
        Duration::from_millis(self.short_ms)
    }

    pub fn long(&self) -> Duration {
        Duration::from_secs(self.long_secs)
    }
}

/// Complete ingestion configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub parser: ParseOptions,
    #[serde(default)]
    pub tiering: TieringConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub faults: FaultInjectionConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

impl IngestConfig {
    /// Environment variable prefix used by [`IngestConfig::load`].
    pub const ENV_PREFIX: &'static str = "TABULAR_";

    /// Load configuration from defaults, an optional TOML file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(IngestConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: IngestConfig = figment
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (defaults fill the gaps).
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: IngestConfig = Figment::from(Serialized::defaults(IngestConfig::default()))
            .merge(Toml::string(toml))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validation.validate().map_err(ConfigError::Invalid)?;
        self.parser.validate().map_err(ConfigError::Invalid)?;
        self.store.validate().map_err(ConfigError::Invalid)?;
        self.faults.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}
