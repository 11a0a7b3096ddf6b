//! Active watches keyed by canonical root path

use crate::handle::WatchHandle;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use filegate_core::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Owns the set of active watches; at most one per root
#[derive(Debug, Default)]
pub(crate) struct WatchRegistry {
    watches: DashMap<PathBuf, Arc<WatchHandle>>,
    /// Absolute paths a watch was requested under, mapped to its canonical root
    aliases: DashMap<PathBuf, PathBuf>,
}

impl WatchRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Install a new watch for `root`, replacing any existing one
    ///
    /// The existing watch is deactivated before `create` runs, so the old and
    /// new watches never deliver concurrently. The slot stays locked while
    /// `create` runs, serialising concurrent starts on the same root. The
    /// displaced handle is released after the slot lock is dropped.
    pub(crate) fn install<F>(&self, root: PathBuf, create: F) -> Result<Arc<WatchHandle>>
    where
        F: FnOnce() -> Result<Arc<WatchHandle>>,
    {
        let (displaced, outcome) = match self.watches.entry(root) {
            Entry::Occupied(mut slot) => {
                let old = Arc::clone(slot.get());
                old.deactivate();
                match create() {
                    Ok(new) => {
                        slot.insert(Arc::clone(&new));
                        (Some(old), Ok(new))
                    }
                    Err(e) => {
                        slot.remove();
                        (Some(old), Err(e))
                    }
                }
            }
            Entry::Vacant(slot) => match create() {
                Ok(new) => {
                    slot.insert(Arc::clone(&new));
                    (None, Ok(new))
                }
                Err(e) => (None, Err(e)),
            },
        };

        if let Some(old) = displaced {
            debug!("Replaced watch {} on {:?}", old.id(), old.root());
            old.release();
        }
        outcome
    }

    /// Remember that `requested` names the watch on `root`
    pub(crate) fn add_alias(&self, requested: PathBuf, root: &Path) {
        if requested != root {
            self.aliases.insert(requested, root.to_path_buf());
        }
    }

    /// Canonical root a watch was requested under as `requested`
    pub(crate) fn resolve_alias(&self, requested: &Path) -> Option<PathBuf> {
        self.aliases.get(requested).map(|root| root.value().clone())
    }

    /// Remove the watch for `root`; the caller disposes it
    pub(crate) fn remove(&self, root: &Path) -> Option<Arc<WatchHandle>> {
        let removed = self.watches.remove(root).map(|(_, handle)| handle);
        if removed.is_some() {
            self.aliases.retain(|_, target| target != root);
        }
        removed
    }

    pub(crate) fn get(&self, root: &Path) -> Option<Arc<WatchHandle>> {
        self.watches.get(root).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn contains(&self, root: &Path) -> bool {
        self.watches.contains_key(root)
    }

    pub(crate) fn roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.watches.iter().map(|e| e.key().clone()).collect();
        roots.sort();
        roots
    }

    /// Remove every watch; the caller disposes them
    pub(crate) fn drain(&self) -> Vec<Arc<WatchHandle>> {
        self.roots()
            .into_iter()
            .filter_map(|root| self.remove(&root))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.watches.len()
    }
}
