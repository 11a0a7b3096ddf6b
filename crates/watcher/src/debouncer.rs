//! Trailing-edge debounce timer
//!
//! Each watch owns one [`DebounceSlot`]. Re-arming the slot aborts the
//! previous timer and bumps a generation counter, so a timer that already
//! woke up but lost the race for the watch lock recognises itself as stale.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::trace;

/// Single cancellable delay slot
#[derive(Debug, Default)]
pub(crate) struct DebounceSlot {
    /// Generation of the most recently armed timer
    generation: u64,
    /// Timer task for the current generation
    timer: Option<JoinHandle<()>>,
}

impl DebounceSlot {
    /// Cancel any pending timer and arm a new one
    ///
    /// `on_quiet` runs with the new generation once `delay` elapses without
    /// another re-arm or cancel.
    pub(crate) fn rearm<F>(&mut self, runtime: &Handle, delay: Duration, on_quiet: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        trace!("Arming debounce timer generation {generation} for {delay:?}");

        self.timer = Some(runtime.spawn(async move {
            sleep(delay).await;
            on_quiet(generation);
        }));
    }

    /// Abort the pending timer, if any
    pub(crate) fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Claim the slot for a firing timer
    ///
    /// Returns `true` only for the timer of the current generation, which
    /// leaves the slot disarmed.
    pub(crate) fn claim(&mut self, generation: u64) -> bool {
        if self.generation != generation || self.timer.is_none() {
            return false;
        }
        self.timer = None;
        true
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.timer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_quiet_period() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let mut slot = DebounceSlot::default();

        let sink = Arc::clone(&fired);
        slot.rearm(&Handle::current(), Duration::from_millis(50), move |g| {
            sink.lock().push(g)
        });
        assert!(slot.is_armed());

        sleep(Duration::from_millis(49)).await;
        assert!(fired.lock().is_empty());

        sleep(Duration::from_millis(2)).await;
        assert_eq!(*fired.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_pushes_deadline_out() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let mut slot = DebounceSlot::default();

        for _ in 0..3 {
            let sink = Arc::clone(&fired);
            slot.rearm(&Handle::current(), Duration::from_millis(50), move |g| {
                sink.lock().push(g)
            });
            sleep(Duration::from_millis(30)).await;
        }
        assert!(fired.lock().is_empty());

        sleep(Duration::from_millis(25)).await;
        assert_eq!(*fired.lock(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let mut slot = DebounceSlot::default();

        let sink = Arc::clone(&fired);
        slot.rearm(&Handle::current(), Duration::from_millis(10), move |g| {
            sink.lock().push(g)
        });
        slot.cancel();
        assert!(!slot.is_armed());

        sleep(Duration::from_millis(50)).await;
        assert!(fired.lock().is_empty());
    }

    #[test]
    fn test_claim_rejects_stale_generation() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let mut slot = DebounceSlot::default();

        slot.rearm(runtime.handle(), Duration::from_secs(1), |_| {});
        slot.rearm(runtime.handle(), Duration::from_secs(1), |_| {});

        assert!(!slot.claim(1));
        assert!(slot.claim(2));
        assert!(!slot.claim(2));
        assert!(!slot.is_armed());
    }
}
