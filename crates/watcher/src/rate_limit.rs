//! Shared per-window change counters
//!
//! Every watch counts its accepted changes in one shared table. A single
//! reset tick clears the whole table at once, so the window boundaries are
//! aligned to engine start rather than to each watch's start.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Per-watch counters for the current rate-limit window
#[derive(Debug, Default)]
pub struct RateLimiter {
    counts: Mutex<HashMap<PathBuf, u32>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one change for `root` unless it already reached `cap` this window
    ///
    /// Returns `false` when the change must be dropped; the counter is not
    /// incremented past the cap.
    pub fn try_acquire(&self, root: &Path, cap: u32) -> bool {
        let mut counts = self.counts.lock();
        let count = counts.entry(root.to_path_buf()).or_insert(0);
        if *count >= cap {
            return false;
        }
        *count += 1;
        true
    }

    /// Accepted changes for `root` in the current window
    pub fn count(&self, root: &Path) -> u32 {
        self.counts.lock().get(root).copied().unwrap_or(0)
    }

    /// Clear every counter
    pub fn reset(&self) {
        let mut counts = self.counts.lock();
        if !counts.is_empty() {
            trace!("Resetting rate counters for {} watches", counts.len());
        }
        counts.clear();
    }

    /// Spawn the shared reset tick, firing every `window` until `cancel` fires
    pub(crate) fn spawn_reset_tick(
        self: &Arc<Self>,
        runtime: &Handle,
        window: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + window, window);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => limiter.reset(),
                }
            }
            debug!("Rate limit reset tick stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_is_enforced_per_root() {
        let limiter = RateLimiter::new();
        let a = Path::new("/in/a");
        let b = Path::new("/in/b");

        assert!(limiter.try_acquire(a, 2));
        assert!(limiter.try_acquire(a, 2));
        assert!(!limiter.try_acquire(a, 2));
        assert!(!limiter.try_acquire(a, 2));
        assert_eq!(limiter.count(a), 2);

        assert!(limiter.try_acquire(b, 2));
        assert_eq!(limiter.count(b), 1);
    }

    #[test]
    fn test_zero_cap_drops_everything() {
        let limiter = RateLimiter::new();
        assert!(!limiter.try_acquire(Path::new("/in"), 0));
        assert_eq!(limiter.count(Path::new("/in")), 0);
    }

    #[test]
    fn test_reset_clears_all_roots() {
        let limiter = RateLimiter::new();
        let a = Path::new("/in/a");
        let b = Path::new("/in/b");
        assert!(limiter.try_acquire(a, 1));
        assert!(limiter.try_acquire(b, 1));

        limiter.reset();

        assert_eq!(limiter.count(a), 0);
        assert_eq!(limiter.count(b), 0);
        assert!(limiter.try_acquire(a, 1));
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_cap() {
        let limiter = Arc::new(RateLimiter::new());
        let root = PathBuf::from("/in");

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let root = root.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.try_acquire(&root, 100))
                        .count()
                })
            })
            .collect();

        let accepted: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(accepted, 100);
        assert_eq!(limiter.count(&root), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_tick_clears_after_window() {
        let limiter = Arc::new(RateLimiter::new());
        let cancel = CancellationToken::new();
        let root = Path::new("/in");
        let task =
            limiter.spawn_reset_tick(&Handle::current(), Duration::from_secs(60), cancel.clone());

        assert!(limiter.try_acquire(root, 1));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!limiter.try_acquire(root, 1));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(limiter.try_acquire(root, 1));

        cancel.cancel();
        task.await.unwrap();
    }
}
