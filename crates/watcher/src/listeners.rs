//! Process-wide change and batch observers

use crate::events::ChangeEvent;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked for every individually delivered change
pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Callback invoked for every delivered batch
pub type BatchCallback = Arc<dyn Fn(&[ChangeEvent]) + Send + Sync>;

/// Identifies a registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered observers, shared by every watch of an engine
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    change: RwLock<Vec<(ListenerId, ChangeCallback)>>,
    batch: RwLock<Vec<(ListenerId, BatchCallback)>>,
}

impl Listeners {
    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn add_change(&self, callback: ChangeCallback) -> ListenerId {
        let id = self.next_id();
        self.change.write().push((id, callback));
        id
    }

    pub(crate) fn add_batch(&self, callback: BatchCallback) -> ListenerId {
        let id = self.next_id();
        self.batch.write().push((id, callback));
        id
    }

    /// Remove a callback of either kind; returns whether it was registered
    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut change = self.change.write();
        let before = change.len();
        change.retain(|(existing, _)| *existing != id);
        if change.len() != before {
            return true;
        }
        drop(change);

        let mut batch = self.batch.write();
        let before = batch.len();
        batch.retain(|(existing, _)| *existing != id);
        batch.len() != before
    }

    // Callbacks run on a snapshot so they may register or remove listeners.
    // `active` is checked before each one; delivery stops once it is false.
    pub(crate) fn emit_change(&self, event: &ChangeEvent, active: impl Fn() -> bool) {
        let snapshot: Vec<ChangeCallback> =
            self.change.read().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in snapshot {
            if !active() {
                return;
            }
            callback(event);
        }
    }

    pub(crate) fn emit_batch(&self, events: &[ChangeEvent], active: impl Fn() -> bool) {
        let snapshot: Vec<BatchCallback> =
            self.batch.read().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in snapshot {
            if !active() {
                return;
            }
            callback(events);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.change.read().len() + self.batch.read().len()
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("change", &self.change.read().len())
            .field("batch", &self.batch.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RawChange;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;

    fn event(path: &str) -> ChangeEvent {
        ChangeEvent::new(RawChange::modified(path), 1, "/in")
    }

    #[test]
    fn test_change_and_batch_are_separate_channels() {
        let listeners = Listeners::default();
        let changes = Arc::new(Mutex::new(0));
        let batches = Arc::new(Mutex::new(Vec::new()));

        let c = Arc::clone(&changes);
        listeners.add_change(Arc::new(move |_| *c.lock() += 1));
        let b = Arc::clone(&batches);
        listeners.add_batch(Arc::new(move |events| b.lock().push(events.len())));

        listeners.emit_change(&event("/in/a.txt"), || true);
        listeners.emit_batch(&[event("/in/a.txt"), event("/in/b.txt")], || true);

        assert_eq!(*changes.lock(), 1);
        assert_eq!(*batches.lock(), vec![2]);
    }

    #[test]
    fn test_remove_listener() {
        let listeners = Listeners::default();
        let hits = Arc::new(Mutex::new(0));

        let h = Arc::clone(&hits);
        let id = listeners.add_change(Arc::new(move |_| *h.lock() += 1));
        assert_eq!(listeners.len(), 1);

        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.emit_change(&event("/in/a.txt"), || true);
        assert_eq!(*hits.lock(), 0);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn test_callback_may_register_listener() {
        let listeners = Arc::new(Listeners::default());
        let inner_hits = Arc::new(Mutex::new(0));

        let registry = Arc::clone(&listeners);
        let hits = Arc::clone(&inner_hits);
        listeners.add_change(Arc::new(move |_| {
            let hits = Arc::clone(&hits);
            registry.add_change(Arc::new(move |_| *hits.lock() += 1));
        }));

        listeners.emit_change(&event("/in/a.txt"), || true);
        assert_eq!(*inner_hits.lock(), 0);
        assert_eq!(listeners.len(), 2);

        listeners.emit_change(&event("/in/a.txt"), || true);
        assert_eq!(*inner_hits.lock(), 1);
    }

    #[test]
    fn test_emission_stops_once_inactive() {
        let listeners = Listeners::default();
        let active = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(Mutex::new(Vec::new()));

        let (flag, sink) = (Arc::clone(&active), Arc::clone(&calls));
        listeners.add_change(Arc::new(move |_| {
            sink.lock().push("first");
            flag.store(false, Ordering::SeqCst);
        }));
        let sink = Arc::clone(&calls);
        listeners.add_change(Arc::new(move |_| sink.lock().push("second")));

        listeners.emit_change(&event("/in/a.txt"), || active.load(Ordering::SeqCst));
        assert_eq!(*calls.lock(), vec!["first"]);
    }
}
