//! Library interface for the filegate CLI
//!
//! This module exposes the flag handling and output formatting for
//! integration testing while keeping the main binary logic in main.rs.

pub mod output;
pub mod policy_args;

pub use anyhow::Result;
pub use policy_args::PolicyArgs;
