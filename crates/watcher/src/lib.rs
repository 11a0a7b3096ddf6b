#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Directory watching for the filegate integration gateway
//!
//! This crate turns raw file system notifications into filtered change
//! events with:
//! - Extension allow-lists, exclude globs and file size bounds
//! - Per-directory rate limiting over a shared window
//! - Debounced, batched or immediate delivery
//! - Pluggable raw change sources (OS notifications or manual feeds)
//!
//! # Example
//!
//! ```no_run
//! use filegate_watcher::{WatchEngine, WatchPolicy};
//! use filegate_core::config::EngineConfig;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = WatchEngine::new(&EngineConfig::default())?;
//!
//! engine.on_change(|event| {
//!     println!("{:?} {}", event.kind(), event.path().display());
//! });
//!
//! let policy = WatchPolicy::builder()
//!     .file_extensions([".csv", ".xml"])
//!     .debounce_interval(Duration::from_millis(500))
//!     .build();
//! engine.start_watching("/srv/inbox", policy)?;
//! # Ok(())
//! # }
//! ```

mod batcher;
mod debouncer;
mod engine;
mod events;
mod filter;
mod handle;
mod listeners;
mod policy;
mod rate_limit;
mod registry;
mod source;

pub use engine::{WatchEngine, WatchEngineBuilder, DEFAULT_RATE_LIMIT_WINDOW};
pub use events::{extension_of, ChangeEvent, ChangeKind, RawChange};
pub use filter::ChangeFilter;
pub use listeners::{BatchCallback, ChangeCallback, ListenerId};
pub use policy::{DispatchMode, WatchPolicy, WatchPolicyBuilder};
pub use rate_limit::RateLimiter;
pub use source::{
    FsSizeLookup, ManualSource, NotifySource, RawChangeSource, RawSubscription, SizeLookup,
    SubscriptionGuard,
};

pub use filegate_core::error::Result;

/// Error type returned by watch operations
pub type WatchError = filegate_core::Error;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::engine::WatchEngine;
    pub use crate::events::{ChangeEvent, ChangeKind};
    pub use crate::policy::WatchPolicy;
}
