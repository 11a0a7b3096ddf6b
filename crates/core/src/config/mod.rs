//! Configuration module for the filegate gateway
//!
//! This module provides configuration structures and loading mechanisms for
//! the gateway. Configuration can be loaded from TOML files and/or environment
//! variables.

mod defaults;
mod loading;


use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use defaults::*;

/// Returns the path to the global configuration file
///
/// The global config is stored at `~/.filegate/config.toml`.
pub fn global_config_path() -> Result<PathBuf> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| Error::config("Unable to determine home directory".to_string()))?;
    Ok(home_dir.join(".filegate").join("config.toml"))
}

/// Main configuration structure for the gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Watch engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Default policy for watches started from the command line
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Directory-watch engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of each raw subscription's event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Length of the shared rate-limit window in seconds
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
}

impl EngineConfig {
    /// Get the rate-limit window as a duration
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
        }
    }
}

/// Serializable form of a watch policy
///
/// Every field is optional; an unset field disables the corresponding stage
/// of the watch pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Extensions to accept, e.g. `[".txt", ".csv"]` (empty accepts all)
    #[serde(default)]
    pub file_extensions: Vec<String>,

    /// Glob patterns whose matches are never reported
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Smallest file size in bytes that is reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_file_size: Option<u64>,

    /// Largest file size in bytes that is reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,

    /// Quiet period in milliseconds before debounced changes are delivered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,

    /// Period in milliseconds between batch deliveries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_ms: Option<u64>,

    /// Maximum accepted changes per rate-limit window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_changes_per_minute: Option<u32>,

    /// Whether subdirectories are watched as well
    #[serde(default = "default_include_subdirectories")]
    pub include_subdirectories: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            file_extensions: Vec::new(),
            exclude_patterns: Vec::new(),
            min_file_size: None,
            max_file_size: None,
            debounce_ms: None,
            buffer_ms: None,
            max_changes_per_minute: None,
            include_subdirectories: default_include_subdirectories(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.engine.event_channel_capacity == 0 {
            return Err(Error::config(
                "engine.event_channel_capacity must be greater than 0".to_string(),
            ));
        }

        if self.engine.rate_limit_window_secs == 0 {
            return Err(Error::config(
                "engine.rate_limit_window_secs must be greater than 0".to_string(),
            ));
        }

        if let (Some(min), Some(max)) = (self.policy.min_file_size, self.policy.max_file_size) {
            if min > max {
                return Err(Error::config(format!(
                    "policy.min_file_size ({min}) exceeds policy.max_file_size ({max})"
                )));
            }
        }

        if self.policy.debounce_ms == Some(0) {
            return Err(Error::config(
                "policy.debounce_ms must be greater than 0".to_string(),
            ));
        }

        if self.policy.buffer_ms == Some(0) {
            return Err(Error::config(
                "policy.buffer_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Renders the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {e}")))
    }
}
