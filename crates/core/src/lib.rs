//! Core types for the filegate integration gateway
//!
//! This crate provides the foundational pieces shared by the gateway crates:
//!
//! - **Configuration**: layered TOML + environment configuration
//! - **Error handling**: unified error type and `ResultExt`
//!

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod config;
pub mod error;

// Re-export main types for convenience
pub use config::{Config, EngineConfig, LoggingConfig, PolicyConfig};
pub use error::{Error, Result, ResultExt};

/// Version of the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, ResultExt};
}
