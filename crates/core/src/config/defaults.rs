//! Default values and functions for configuration

// Default constants
pub(crate) const DEFAULT_LOG_LEVEL: &str = "info";
pub(crate) const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 4096;
pub(crate) const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

pub(crate) fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

pub(crate) fn default_rate_limit_window_secs() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECS
}

pub(crate) fn default_include_subdirectories() -> bool {
    true
}

pub(crate) fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
