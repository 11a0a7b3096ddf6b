//! Per-watch state
//!
//! A [`WatchHandle`] owns everything one active watch needs: its policy and
//! compiled filter, the pending-change queue, the debounce slot, the raw
//! subscription and the cancellation token shared by its background tasks.
//!
//! Queue and timer mutations happen under `state`. Consumer callbacks run
//! outside that lock but inside the `delivery` gate, which `release` waits
//! on so that no callback starts once a stop has returned. A `release`
//! issued from inside a callback does not wait on any gate; the active flag,
//! re-checked before each callback, keeps the stopped watch quiet instead.

use crate::debouncer::DebounceSlot;
use crate::events::ChangeEvent;
use crate::filter::ChangeFilter;
use crate::listeners::Listeners;
use crate::policy::WatchPolicy;
use crate::source::SubscriptionGuard;
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

thread_local! {
    /// Number of deliveries running on this thread
    static DELIVERY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as delivering for its lifetime
struct DeliveryScope;

impl DeliveryScope {
    fn enter() -> Self {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        DeliveryScope
    }

    fn is_delivering() -> bool {
        DELIVERY_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

#[derive(Debug, Default)]
struct WatchState {
    pending: VecDeque<ChangeEvent>,
    debounce: DebounceSlot,
}

pub(crate) struct WatchHandle {
    id: u64,
    root: PathBuf,
    policy: Arc<WatchPolicy>,
    filter: ChangeFilter,
    active: AtomicBool,
    state: Mutex<WatchState>,
    delivery: Mutex<()>,
    cancel: CancellationToken,
    subscription: Mutex<Option<Box<dyn SubscriptionGuard>>>,
}

impl WatchHandle {
    pub(crate) fn new(
        id: u64,
        root: PathBuf,
        policy: WatchPolicy,
        filter: ChangeFilter,
        cancel: CancellationToken,
        subscription: Box<dyn SubscriptionGuard>,
    ) -> Self {
        Self {
            id,
            root,
            policy: Arc::new(policy),
            filter,
            active: AtomicBool::new(true),
            state: Mutex::new(WatchState::default()),
            delivery: Mutex::new(()),
            cancel,
            subscription: Mutex::new(Some(subscription)),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn policy(&self) -> &Arc<WatchPolicy> {
        &self.policy
    }

    pub(crate) fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Resolves once the watch is stopped or the engine shuts down
    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Queue a change for the next batch tick
    pub(crate) fn enqueue(&self, event: ChangeEvent) -> bool {
        let mut state = self.state.lock();
        if !self.is_active() {
            return false;
        }
        state.pending.push_back(event);
        true
    }

    /// Queue a change and restart the quiet-period countdown
    pub(crate) fn enqueue_debounced(
        self: &Arc<Self>,
        event: ChangeEvent,
        delay: Duration,
        runtime: &Handle,
        listeners: &Arc<Listeners>,
    ) -> bool {
        let mut state = self.state.lock();
        if !self.is_active() {
            return false;
        }
        state.pending.push_back(event);

        let handle = Arc::clone(self);
        let listeners = Arc::clone(listeners);
        state.debounce.rearm(runtime, delay, move |generation| {
            handle.flush_debounced(generation, &listeners);
        });
        true
    }

    /// Deliver every queued change individually, if `generation` is still current
    fn flush_debounced(&self, generation: u64, listeners: &Listeners) {
        let drained: Vec<ChangeEvent> = {
            let mut state = self.state.lock();
            if !self.is_active() || !state.debounce.claim(generation) {
                return;
            }
            state.pending.drain(..).collect()
        };

        debug!(
            "Debounce window elapsed for {:?}, delivering {} changes",
            self.root,
            drained.len()
        );
        for event in &drained {
            self.deliver_change(event, listeners);
        }
    }

    /// Take every queued change in enqueue order
    pub(crate) fn drain_pending(&self) -> Vec<ChangeEvent> {
        let mut state = self.state.lock();
        if !self.is_active() {
            return Vec::new();
        }
        state.pending.drain(..).collect()
    }

    pub(crate) fn deliver_change(&self, event: &ChangeEvent, listeners: &Listeners) {
        let _gate = self.delivery.lock();
        let _scope = DeliveryScope::enter();
        listeners.emit_change(event, || self.is_active());
    }

    pub(crate) fn deliver_batch(&self, events: &[ChangeEvent], listeners: &Listeners) {
        let _gate = self.delivery.lock();
        let _scope = DeliveryScope::enter();
        listeners.emit_batch(events, || self.is_active());
    }

    /// Stop accepting and delivering changes
    ///
    /// Cancels the debounce timer and background tasks and discards the
    /// pending queue. Never blocks on consumer callbacks.
    pub(crate) fn deactivate(&self) {
        let discarded = {
            let mut state = self.state.lock();
            self.active.store(false, Ordering::SeqCst);
            state.debounce.cancel();
            let discarded = state.pending.len();
            state.pending.clear();
            discarded
        };
        self.cancel.cancel();

        if discarded > 0 {
            debug!(
                "Discarded {} undelivered changes for {:?}",
                discarded, self.root
            );
        }
    }

    /// Wait for in-flight callbacks and release the raw subscription
    ///
    /// Must be called after [`WatchHandle::deactivate`] and without holding
    /// registry locks. Called from inside a callback it does not wait, so
    /// callbacks on different threads may stop each other's watches.
    pub(crate) fn release(&self) {
        if !DeliveryScope::is_delivering() {
            drop(self.delivery.lock());
        }

        let subscription = self.subscription.lock().take();
        if let Some(mut subscription) = subscription {
            if let Err(e) = subscription.unsubscribe() {
                warn!("Failed to release subscription for {:?}: {}", self.root, e);
            }
        }
    }

    pub(crate) fn dispose(&self) {
        self.deactivate();
        self.release();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("policy", &self.policy)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RawChange;
    use filegate_core::error::Result;
    use std::sync::atomic::AtomicUsize;

    struct CountingGuard(Arc<AtomicUsize>);

    impl SubscriptionGuard for CountingGuard {
        fn unsubscribe(&mut self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn handle(releases: &Arc<AtomicUsize>) -> Arc<WatchHandle> {
        let policy = WatchPolicy::default();
        let filter = ChangeFilter::from_policy(&policy).unwrap();
        Arc::new(WatchHandle::new(
            1,
            PathBuf::from("/in"),
            policy,
            filter,
            CancellationToken::new(),
            Box::new(CountingGuard(Arc::clone(releases))),
        ))
    }

    fn event(path: &str) -> ChangeEvent {
        ChangeEvent::new(RawChange::created(path), 0, "/in")
    }

    #[test]
    fn test_drain_preserves_order() {
        let releases = Arc::new(AtomicUsize::new(0));
        let h = handle(&releases);
        assert!(h.enqueue(event("/in/x.txt")));
        assert!(h.enqueue(event("/in/y.txt")));
        assert!(h.enqueue(event("/in/z.txt")));
        assert_eq!(h.pending_count(), 3);

        let drained: Vec<_> = h
            .drain_pending()
            .iter()
            .map(|e| e.path().to_path_buf())
            .collect();
        assert_eq!(
            drained,
            vec![
                PathBuf::from("/in/x.txt"),
                PathBuf::from("/in/y.txt"),
                PathBuf::from("/in/z.txt")
            ]
        );
        assert_eq!(h.pending_count(), 0);
    }

    #[test]
    fn test_dispose_discards_and_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let h = handle(&releases);
        h.enqueue(event("/in/x.txt"));

        h.dispose();
        assert!(!h.is_active());
        assert_eq!(h.pending_count(), 0);
        assert!(!h.enqueue(event("/in/y.txt")));
        assert!(h.drain_pending().is_empty());

        h.dispose();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_delivery_after_deactivate() {
        let releases = Arc::new(AtomicUsize::new(0));
        let h = handle(&releases);
        let listeners = Listeners::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        listeners.add_change(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        h.deliver_change(&event("/in/a.txt"), &listeners);
        h.deactivate();
        h.deliver_change(&event("/in/b.txt"), &listeners);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_dispose_its_own_watch() {
        let releases = Arc::new(AtomicUsize::new(0));
        let h = handle(&releases);
        let listeners = Listeners::default();

        let inner = Arc::clone(&h);
        listeners.add_change(Arc::new(move |_| inner.dispose()));

        h.deliver_change(&event("/in/a.txt"), &listeners);
        assert!(!h.is_active());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callbacks_may_stop_each_others_watch() {
        let releases = Arc::new(AtomicUsize::new(0));
        let first = handle(&releases);
        let second = handle(&releases);
        let listeners = Arc::new(Listeners::default());
        let both_inside = Arc::new(std::sync::Barrier::new(2));

        let (a, b) = (Arc::clone(&first), Arc::clone(&second));
        let barrier = Arc::clone(&both_inside);
        listeners.add_change(Arc::new(move |event| {
            barrier.wait();
            if event.path().ends_with("from-first.txt") {
                b.dispose();
            } else {
                a.dispose();
            }
        }));

        let threads: Vec<_> = [
            (Arc::clone(&first), "/in/from-first.txt"),
            (Arc::clone(&second), "/in/from-second.txt"),
        ]
        .into_iter()
        .map(|(h, path)| {
            let listeners = Arc::clone(&listeners);
            std::thread::spawn(move || h.deliver_change(&event(path), &listeners))
        })
        .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert!(!first.is_active());
        assert!(!second.is_active());
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }
}
