//! Configuration loading from files and environment variables

use crate::error::{Error, Result};
use config::{Config as ConfigLib, ConfigBuilder as LibConfigBuilder, Environment, File};
use std::path::Path;
use tracing::debug;

use super::defaults::*;
use super::{global_config_path, Config};

/// Environment variable prefix for configuration overrides
pub(crate) const ENV_PREFIX: &str = "FILEGATE";

/// Helper to set a config default with consistent error mapping
fn set_config_default<T: Into<config::Value>>(
    builder: LibConfigBuilder<config::builder::DefaultState>,
    key: &str,
    value: T,
) -> Result<LibConfigBuilder<config::builder::DefaultState>> {
    builder
        .set_default(key, value)
        .map_err(|e| Error::config(format!("Failed to set {key} default: {e}")))
}

impl Config {
    /// Loads configuration from a TOML file with environment variable overrides
    ///
    /// Environment variables are prefixed with `FILEGATE_` and use double underscores
    /// for nested values. For example:
    /// - `FILEGATE_ENGINE__EVENT_CHANNEL_CAPACITY=64`
    /// - `FILEGATE_POLICY__FILE_EXTENSIONS=.txt,.csv`
    pub fn from_file(path: &Path) -> Result<Self> {
        let builder = ConfigLib::builder();

        // Section defaults are set explicitly; serde defaults are not applied for absent sections
        let builder = set_config_default(
            builder,
            "engine.event_channel_capacity",
            default_event_channel_capacity() as i64,
        )?;
        let builder = set_config_default(
            builder,
            "engine.rate_limit_window_secs",
            default_rate_limit_window_secs() as i64,
        )?;
        let builder = set_config_default(
            builder,
            "policy.include_subdirectories",
            default_include_subdirectories(),
        )?;
        let mut builder = set_config_default(builder, "logging.level", default_log_level())?;

        // Add the config file if it exists
        if path.exists() {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path));
        } else {
            debug!("No configuration file at {}, using defaults", path.display());
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("policy.file_extensions")
                .with_list_parse_key("policy.exclude_patterns"),
        );

        let config = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize config: {e}")))
    }

    /// Creates a config from a TOML string (useful for testing)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration
    ///
    /// Precedence (lowest to highest):
    /// 1. Hardcoded defaults
    /// 2. Config file (~/.filegate/config.toml or custom --config path)
    /// 3. Environment variables (FILEGATE_*)
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => global_config_path()?,
        };
        let config = Self::from_file(&path)?;
        config.validate()?;
        Ok(config)
    }
}
