//! Runtime configuration and builder

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use service_builder::builder;
use thiserror::Error;

use crate::error::ModelError;

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },
}

impl From<ConfigError> for ModelError {
    fn from(err: ConfigError) -> Self {
        ModelError::Configuration(err.to_string())
    }
}

/// Defaults shared by the builder, `Default` and `from_env`
pub struct RuntimeDefaults;

impl RuntimeDefaults {
    pub const TIMEOUT_SECS: u64 = 30;
    pub const PRELOAD_BATCH_SIZE: usize = 1000;
    pub const CURSOR_BATCH_SIZE: usize = 100;
    pub const PAGE_SIZE: u64 = 20;
    pub const LOG_STATEMENTS: bool = false;
}

/// Settings for the operation pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct RuntimeConfig {
    /// Deadline applied to operations that do not set their own
    #[builder(default = "Duration::from_secs(RuntimeDefaults::TIMEOUT_SECS)", getter)]
    pub default_timeout: Duration,

    /// Maximum keys per batched preload lookup
    #[builder(default = "RuntimeDefaults::PRELOAD_BATCH_SIZE", getter)]
    pub preload_batch_size: usize,

    /// Records fetched per round trip by cursors
    #[builder(default = "RuntimeDefaults::CURSOR_BATCH_SIZE", getter)]
    pub cursor_batch_size: usize,

    /// Page size used by `page()` when none was given
    #[builder(default = "RuntimeDefaults::PAGE_SIZE", getter)]
    pub default_page_size: u64,

    /// Log every adapter call at debug level
    #[builder(default = "RuntimeDefaults::LOG_STATEMENTS", getter)]
    pub log_statements: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(RuntimeDefaults::TIMEOUT_SECS),
            preload_batch_size: RuntimeDefaults::PRELOAD_BATCH_SIZE,
            cursor_batch_size: RuntimeDefaults::CURSOR_BATCH_SIZE,
            default_page_size: RuntimeDefaults::PAGE_SIZE,
            log_statements: RuntimeDefaults::LOG_STATEMENTS,
        }
    }
}

impl RuntimeConfig {
    /// Read `ELIF_DB_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeout_secs: u64 = parse_env(
            "ELIF_DB_TIMEOUT",
            RuntimeDefaults::TIMEOUT_SECS,
            "default_timeout",
            "valid number of seconds",
        )?;
        let config = Self {
            default_timeout: Duration::from_secs(timeout_secs),
            preload_batch_size: parse_env(
                "ELIF_DB_PRELOAD_BATCH_SIZE",
                RuntimeDefaults::PRELOAD_BATCH_SIZE,
                "preload_batch_size",
                "positive integer",
            )?,
            cursor_batch_size: parse_env(
                "ELIF_DB_CURSOR_BATCH_SIZE",
                RuntimeDefaults::CURSOR_BATCH_SIZE,
                "cursor_batch_size",
                "positive integer",
            )?,
            default_page_size: parse_env(
                "ELIF_DB_PAGE_SIZE",
                RuntimeDefaults::PAGE_SIZE,
                "default_page_size",
                "positive integer",
            )?,
            log_statements: parse_env(
                "ELIF_DB_LOG_STATEMENTS",
                RuntimeDefaults::LOG_STATEMENTS,
                "log_statements",
                "true or false",
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preload_batch_size == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "preload_batch_size must be greater than zero".to_string(),
            });
        }
        if self.cursor_batch_size == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "cursor_batch_size must be greater than zero".to_string(),
            });
        }
        if self.default_page_size == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "default_page_size must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(
    key: &str,
    default: T,
    field: &str,
    expected: &str,
) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw,
            expected: expected.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

impl RuntimeConfigBuilder {
    /// Short deadlines and small batches for local work
    pub fn development() -> Self {
        RuntimeConfigBuilder::new()
            .default_timeout(Duration::from_secs(10))
            .log_statements(true)
    }

    /// Tiny batches so batching paths are exercised in tests
    pub fn testing() -> Self {
        RuntimeConfigBuilder::new()
            .default_timeout(Duration::from_secs(5))
            .preload_batch_size(50)
            .cursor_batch_size(2)
    }
}
