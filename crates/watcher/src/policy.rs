//! Watch policy types
//!
//! A policy is supplied when a watch starts and stays immutable for the
//! lifetime of that watch. It controls filtering, rate limiting and how
//! accepted changes are dispatched.

use filegate_core::config::PolicyConfig;
use filegate_core::error::{Error, Result};
use glob::Pattern;
use std::collections::BTreeSet;
use std::time::Duration;

/// Immutable per-watch policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPolicy {
    /// Accepted extensions, lowercased with a leading dot (empty accepts all)
    pub file_extensions: BTreeSet<String>,
    /// Glob patterns whose matches are never reported
    pub exclude_patterns: Vec<String>,
    /// Smallest reported file size in bytes
    pub min_file_size: Option<u64>,
    /// Largest reported file size in bytes
    pub max_file_size: Option<u64>,
    /// Quiet period that enables debounce mode
    pub debounce_interval: Option<Duration>,
    /// Flush period that enables batch mode
    pub buffer_interval: Option<Duration>,
    /// Cap on accepted changes per rate-limit window
    pub max_changes_per_minute: Option<u32>,
    /// Whether subdirectories are watched (default: true)
    pub include_subdirectories: bool,
}

/// How accepted changes reach consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Deliver every change individually after a quiet period
    Debounce(Duration),
    /// Deliver changes as one batch per period
    Batch(Duration),
    /// Deliver each change as soon as it is accepted
    Immediate,
}

impl WatchPolicy {
    /// Create a policy that accepts every change immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a policy from builder
    pub fn builder() -> WatchPolicyBuilder {
        WatchPolicyBuilder::default()
    }

    /// Dispatch mode for this policy
    ///
    /// Debounce takes precedence when both intervals are set.
    pub fn dispatch_mode(&self) -> DispatchMode {
        match (self.debounce_interval, self.buffer_interval) {
            (Some(delay), _) => DispatchMode::Debounce(delay),
            (None, Some(period)) => DispatchMode::Batch(period),
            (None, None) => DispatchMode::Immediate,
        }
    }

    /// Check the policy for contradictory or unusable settings
    pub fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min_file_size, self.max_file_size) {
            if min > max {
                return Err(Error::invalid_input(format!(
                    "min_file_size ({min}) exceeds max_file_size ({max})"
                )));
            }
        }

        if self.debounce_interval == Some(Duration::ZERO) {
            return Err(Error::invalid_input("debounce_interval must be non-zero"));
        }

        if self.buffer_interval == Some(Duration::ZERO) {
            return Err(Error::invalid_input("buffer_interval must be non-zero"));
        }

        for pattern in &self.exclude_patterns {
            Pattern::new(pattern).map_err(|e| {
                Error::invalid_input(format!("Invalid exclude pattern '{pattern}': {e}"))
            })?;
        }

        Ok(())
    }
}

impl Default for WatchPolicy {
    fn default() -> Self {
        Self {
            file_extensions: BTreeSet::new(),
            exclude_patterns: Vec::new(),
            min_file_size: None,
            max_file_size: None,
            debounce_interval: None,
            buffer_interval: None,
            max_changes_per_minute: None,
            include_subdirectories: true,
        }
    }
}

impl From<&PolicyConfig> for WatchPolicy {
    fn from(config: &PolicyConfig) -> Self {
        let mut builder = WatchPolicy::builder()
            .file_extensions(config.file_extensions.iter().cloned())
            .include_subdirectories(config.include_subdirectories);

        for pattern in &config.exclude_patterns {
            builder = builder.exclude_pattern(pattern.clone());
        }
        if let Some(min) = config.min_file_size {
            builder = builder.min_file_size(min);
        }
        if let Some(max) = config.max_file_size {
            builder = builder.max_file_size(max);
        }
        if let Some(ms) = config.debounce_ms {
            builder = builder.debounce_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = config.buffer_ms {
            builder = builder.buffer_interval(Duration::from_millis(ms));
        }
        if let Some(cap) = config.max_changes_per_minute {
            builder = builder.max_changes_per_minute(cap);
        }

        builder.build()
    }
}

/// Normalise an extension to lowercase with a leading dot
pub(crate) fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

/// Builder for WatchPolicy
#[derive(Debug, Default)]
pub struct WatchPolicyBuilder {
    policy: WatchPolicy,
}

impl WatchPolicyBuilder {
    /// Add an accepted extension (`"txt"` and `".TXT"` are equivalent)
    pub fn file_extension(mut self, ext: impl AsRef<str>) -> Self {
        self.policy
            .file_extensions
            .insert(normalize_extension(ext.as_ref()));
        self
    }

    /// Add several accepted extensions
    pub fn file_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for ext in exts {
            self = self.file_extension(ext);
        }
        self
    }

    /// Add an exclude glob pattern
    pub fn exclude_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.policy.exclude_patterns.push(pattern.into());
        self
    }

    /// Set the minimum reported file size
    pub fn min_file_size(mut self, size: u64) -> Self {
        self.policy.min_file_size = Some(size);
        self
    }

    /// Set the maximum reported file size
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.policy.max_file_size = Some(size);
        self
    }

    /// Enable debounce mode
    pub fn debounce_interval(mut self, interval: Duration) -> Self {
        self.policy.debounce_interval = Some(interval);
        self
    }

    /// Enable batch mode
    pub fn buffer_interval(mut self, interval: Duration) -> Self {
        self.policy.buffer_interval = Some(interval);
        self
    }

    /// Cap accepted changes per rate-limit window
    pub fn max_changes_per_minute(mut self, cap: u32) -> Self {
        self.policy.max_changes_per_minute = Some(cap);
        self
    }

    /// Set whether subdirectories are watched
    pub fn include_subdirectories(mut self, include: bool) -> Self {
        self.policy.include_subdirectories = include;
        self
    }

    /// Build the policy
    pub fn build(self) -> WatchPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_policy_builder() {
        let policy = WatchPolicy::builder()
            .file_extensions(["TXT", ".csv", " .Md "])
            .min_file_size(1)
            .max_file_size(1024)
            .max_changes_per_minute(5)
            .include_subdirectories(false)
            .build();

        let exts: Vec<_> = policy.file_extensions.iter().cloned().collect();
        assert_eq!(exts, vec![".csv", ".md", ".txt"]);
        assert_eq!(policy.min_file_size, Some(1));
        assert_eq!(policy.max_file_size, Some(1024));
        assert_eq!(policy.max_changes_per_minute, Some(5));
        assert!(!policy.include_subdirectories);
    }

    #[test]
    fn test_default_policy() {
        let policy = WatchPolicy::default();
        assert!(policy.include_subdirectories);
        assert!(policy.file_extensions.is_empty());
        assert_eq!(policy.dispatch_mode(), DispatchMode::Immediate);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_debounce_wins_over_buffer() {
        let policy = WatchPolicy::builder()
            .debounce_interval(Duration::from_millis(50))
            .buffer_interval(Duration::from_millis(100))
            .build();
        assert_eq!(
            policy.dispatch_mode(),
            DispatchMode::Debounce(Duration::from_millis(50))
        );

        let policy = WatchPolicy::builder()
            .buffer_interval(Duration::from_millis(100))
            .build();
        assert_eq!(
            policy.dispatch_mode(),
            DispatchMode::Batch(Duration::from_millis(100))
        );
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let policy = WatchPolicy::builder()
            .min_file_size(10)
            .max_file_size(5)
            .build();
        assert!(matches!(policy.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let policy = WatchPolicy::builder()
            .debounce_interval(Duration::ZERO)
            .build();
        assert!(policy.validate().is_err());

        let policy = WatchPolicy::builder()
            .buffer_interval(Duration::ZERO)
            .build();
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_glob() {
        let policy = WatchPolicy::builder().exclude_pattern("[unclosed").build();
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("[unclosed"));
    }

    #[test]
    fn test_from_policy_config() {
        let config = PolicyConfig {
            file_extensions: vec!["PDF".to_string()],
            exclude_patterns: vec!["*.part".to_string()],
            min_file_size: Some(1),
            max_file_size: None,
            debounce_ms: None,
            buffer_ms: Some(250),
            max_changes_per_minute: Some(100),
            include_subdirectories: false,
        };

        let policy = WatchPolicy::from(&config);
        assert!(policy.file_extensions.contains(".pdf"));
        assert_eq!(policy.exclude_patterns, vec!["*.part"]);
        assert_eq!(policy.min_file_size, Some(1));
        assert_eq!(policy.buffer_interval, Some(Duration::from_millis(250)));
        assert_eq!(policy.max_changes_per_minute, Some(100));
        assert!(!policy.include_subdirectories);
        assert_eq!(
            policy.dispatch_mode(),
            DispatchMode::Batch(Duration::from_millis(250))
        );
    }
}
