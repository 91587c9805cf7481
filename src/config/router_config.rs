//! Router configuration using Figment
//!
//! Configuration is loaded from:
//! 1. Built-in defaults
//! 2. A TOML file
//! 3. Environment variables (prefixed with `DAQ_ROUTER_`, sections split by `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! DAQ_ROUTER_APPLICATION__LOG_LEVEL=debug
//! DAQ_ROUTER_CORRELATION__DARK_FLAG=is_dark
//! DAQ_ROUTER_CORRELATION__MAX_TIME_DELTA_S=3600
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "DAQ_ROUTER_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Sources could not be read or merged
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// A value is out of range
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    /// Rendering as TOML failed
    #[error("Configuration serialization error: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Top-level router configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Transport filtering
    pub transport: TransportConfig,
    /// Auxiliary run lookup
    pub correlation: CorrelationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "daq-router".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Transport configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Topic prefixes this pipeline subscribes to (empty = all)
    pub topic_prefixes: Vec<String>,
}

/// How auxiliary (dark / background) runs are located
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Start metadata key marking a dark-frame run
    pub dark_flag: String,
    /// Start metadata key marking a background run
    pub background_flag: String,
    /// Metadata fields that must be equal between a run and its auxiliary run
    pub match_fields: Vec<String>,
    /// Only consider runs whose stop document has been seen
    pub completed_only: bool,
    /// Reject candidates further away in time than this (seconds)
    pub max_time_delta_s: Option<f64>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            dark_flag: "is_dark".to_string(),
            background_flag: "is_background".to_string(),
            match_fields: vec!["detectors".to_string()],
            completed_only: true,
            max_time_delta_s: None,
        }
    }
}

impl RouterConfig {
    /// Load configuration from a TOML file and environment variables
    ///
    /// Precedence (highest to lowest): environment, file, defaults. A missing
    /// file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the sources cannot be merged or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(RouterConfig::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Load configuration from a TOML string (no environment overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::from_figment(Figment::from(Serialized::defaults(RouterConfig::default())).merge(Toml::string(toml)))
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML, e.g. to write a starter file.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Correlation flag keys are non-empty
    /// - `match_fields` has no duplicates
    /// - `max_time_delta_s` is finite and non-negative
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let correlation = &self.correlation;
        if correlation.dark_flag.is_empty() || correlation.background_flag.is_empty() {
            return Err(ConfigError::ValidationError(
                "correlation.dark_flag and correlation.background_flag must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for field in &correlation.match_fields {
            if !seen.insert(field) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate correlation match field: '{}'",
                    field
                )));
            }
        }

        if let Some(delta) = correlation.max_time_delta_s {
            if !delta.is_finite() || delta < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid max_time_delta_s {}. Must be a finite, non-negative number of seconds",
                    delta
                )));
            }
        }

        Ok(())
    }
}
