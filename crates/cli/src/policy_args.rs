//! Command-line overrides for the configured watch policy

use clap::Args;
use filegate_core::config::PolicyConfig;

/// Policy flags of the `watch` command
///
/// Every flag that is given replaces the corresponding `[policy]` setting
/// from the configuration file.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct PolicyArgs {
    /// Accepted file extension (repeatable), e.g. `--ext .csv --ext xml`
    #[arg(long = "ext", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Glob pattern to ignore (repeatable)
    #[arg(long = "exclude", value_name = "GLOB")]
    pub exclude_patterns: Vec<String>,

    /// Smallest reported file size in bytes
    #[arg(long, value_name = "BYTES")]
    pub min_size: Option<u64>,

    /// Largest reported file size in bytes
    #[arg(long, value_name = "BYTES")]
    pub max_size: Option<u64>,

    /// Deliver changes after this many quiet milliseconds
    #[arg(long, value_name = "MS")]
    pub debounce_ms: Option<u64>,

    /// Deliver changes in batches every this many milliseconds
    #[arg(long, value_name = "MS")]
    pub buffer_ms: Option<u64>,

    /// Maximum changes reported per directory and rate-limit window
    #[arg(long, value_name = "COUNT")]
    pub max_per_minute: Option<u32>,

    /// Only watch the top level of each directory
    #[arg(long)]
    pub no_recursive: bool,
}

impl PolicyArgs {
    /// Overlay the given flags on `config`
    pub fn apply(&self, config: &mut PolicyConfig) {
        if !self.extensions.is_empty() {
            config.file_extensions = self.extensions.clone();
        }
        if !self.exclude_patterns.is_empty() {
            config.exclude_patterns = self.exclude_patterns.clone();
        }
        if self.min_size.is_some() {
            config.min_file_size = self.min_size;
        }
        if self.max_size.is_some() {
            config.max_file_size = self.max_size;
        }
        if self.debounce_ms.is_some() {
            config.debounce_ms = self.debounce_ms;
        }
        if self.buffer_ms.is_some() {
            config.buffer_ms = self.buffer_ms;
        }
        if self.max_per_minute.is_some() {
            config.max_changes_per_minute = self.max_per_minute;
        }
        if self.no_recursive {
            config.include_subdirectories = false;
        }
    }
}
