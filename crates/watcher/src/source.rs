//! Raw change sources and file size lookup
//!
//! A [`RawChangeSource`] turns a directory root into a stream of unfiltered
//! [`RawChange`]s. [`NotifySource`] is backed by the operating system's
//! notification mechanism through the notify crate; [`ManualSource`] is fed
//! programmatically.

use crate::events::{ChangeKind, RawChange};
use async_trait::async_trait;
use dashmap::DashMap;
use filegate_core::error::{Error, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{
    Config as NotifyConfig, Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode,
    Watcher as NotifyWatcher,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Releases the resources behind a raw subscription
pub trait SubscriptionGuard: Send {
    /// Stop delivering events and release the underlying handle
    fn unsubscribe(&mut self) -> Result<()>;
}

/// Active subscription to a raw change source
pub struct RawSubscription {
    /// Unfiltered changes for the subscribed root
    pub events: mpsc::Receiver<RawChange>,
    /// Releases the subscription when unsubscribed
    pub guard: Box<dyn SubscriptionGuard>,
}

impl RawSubscription {
    pub fn new(events: mpsc::Receiver<RawChange>, guard: impl SubscriptionGuard + 'static) -> Self {
        Self {
            events,
            guard: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for RawSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawSubscription").finish_non_exhaustive()
    }
}

/// Producer of unfiltered change notifications for a directory root
pub trait RawChangeSource: Send + Sync {
    /// Subscribe to changes under `root`, including subdirectories when `recursive`
    fn subscribe(&self, root: &Path, recursive: bool) -> Result<RawSubscription>;
}

/// Lookup of a file's current size
#[async_trait]
pub trait SizeLookup: Send + Sync {
    /// Size of the regular file at `path`, or `None` if it does not exist
    async fn size(&self, path: &Path) -> std::io::Result<Option<u64>>;
}

/// Size lookup backed by file system metadata
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSizeLookup;

#[async_trait]
impl SizeLookup for FsSizeLookup {
    async fn size(&self, path: &Path) -> std::io::Result<Option<u64>> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Raw change source backed by the platform's recommended notify watcher
#[derive(Debug, Clone)]
pub struct NotifySource {
    /// Capacity of each subscription's channel
    channel_capacity: usize,
}

impl NotifySource {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channel_capacity: channel_capacity.max(1),
        }
    }
}

impl Default for NotifySource {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl RawChangeSource for NotifySource {
    fn subscribe(&self, root: &Path, recursive: bool) -> Result<RawSubscription> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        let mut translator = NotifyTranslator::default();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<NotifyEvent, notify::Error>| match res {
                Ok(event) => {
                    if let Some(change) = translator.translate(event) {
                        if let Err(e) = tx.try_send(change) {
                            warn!("Dropping raw change event: {}", e);
                        }
                    }
                }
                Err(e) => {
                    error!("Notify error: {}", e);
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|e| Error::watcher(format!("Failed to create watcher: {e}")))?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(root, mode)
            .map_err(|e| Error::watcher(format!("Failed to watch path {root:?}: {e}")))?;

        info!("Watching path: {:?} (recursive: {})", root, recursive);
        Ok(RawSubscription::new(
            rx,
            NotifyGuard {
                watcher: Some(watcher),
                root: root.to_path_buf(),
            },
        ))
    }
}

/// Owns the notify watcher for one subscription
struct NotifyGuard {
    watcher: Option<RecommendedWatcher>,
    root: PathBuf,
}

impl SubscriptionGuard for NotifyGuard {
    fn unsubscribe(&mut self) -> Result<()> {
        let Some(mut watcher) = self.watcher.take() else {
            return Ok(());
        };
        // The watcher is dropped either way, which releases the OS handle.
        watcher
            .unwatch(&self.root)
            .map_err(|e| Error::watcher(format!("Failed to unwatch {:?}: {e}", self.root)))
    }
}

impl Drop for NotifyGuard {
    fn drop(&mut self) {
        if let Err(e) = self.unsubscribe() {
            debug!("{}", e);
        }
    }
}

/// Rename halves remembered while waiting for their other half
const MOVE_HISTORY: usize = 64;

/// Converts notify events of one subscription into raw changes
///
/// Access and metadata-only notifications are ignored. A file moved in from
/// outside the watch is reported by notify as a lone rename-to half and
/// becomes `Created`; a lone rename-from half becomes `Deleted`. When both
/// halves share a tracker, the rename-to half becomes `Renamed` with the old
/// path and the combined notification some backends send afterwards is
/// suppressed.
#[derive(Debug, Default)]
pub(crate) struct NotifyTranslator {
    /// Rename-from halves by tracker, oldest first
    moved_from: VecDeque<(usize, PathBuf)>,
    /// Trackers whose rename was already reported from its halves
    paired: VecDeque<usize>,
}

impl NotifyTranslator {
    pub(crate) fn translate(&mut self, event: NotifyEvent) -> Option<RawChange> {
        let tracker = event.tracker();
        let mut paths = event.paths.into_iter();
        match event.kind {
            EventKind::Create(_) => paths.next().map(RawChange::created),
            EventKind::Remove(_) => paths.next().map(RawChange::deleted),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                let from = paths.next()?;
                if let Some(tracker) = tracker {
                    remember(&mut self.moved_from, (tracker, from.clone()));
                }
                Some(RawChange::deleted(from))
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                let to = paths.next()?;
                match tracker.and_then(|t| self.take_moved_from(t)) {
                    Some((tracker, from)) => {
                        remember(&mut self.paired, tracker);
                        Some(RawChange::renamed(from, to))
                    }
                    None => Some(RawChange::created(to)),
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let Some(tracker) = tracker {
                    if let Some(pos) = self.paired.iter().position(|t| *t == tracker) {
                        self.paired.remove(pos);
                        return None;
                    }
                }
                let from = paths.next()?;
                match paths.next() {
                    Some(to) => Some(RawChange::renamed(from, to)),
                    None => Some(RawChange::new(from, ChangeKind::Renamed)),
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                paths.next().map(|p| RawChange::new(p, ChangeKind::Renamed))
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => None,
            EventKind::Modify(_) => paths.next().map(RawChange::modified),
            _ => None,
        }
    }

    fn take_moved_from(&mut self, tracker: usize) -> Option<(usize, PathBuf)> {
        let pos = self.moved_from.iter().position(|(t, _)| *t == tracker)?;
        self.moved_from.remove(pos)
    }
}

fn remember<T>(history: &mut VecDeque<T>, entry: T) {
    if history.len() == MOVE_HISTORY {
        history.pop_front();
    }
    history.push_back(entry);
}

/// Raw change source driven by explicit [`ManualSource::emit`] calls
///
/// Useful for feeding changes observed by another system (for example a
/// remote poller) through the same filtering pipeline.
#[derive(Debug, Clone)]
pub struct ManualSource {
    subscribers: Arc<DashMap<PathBuf, Vec<(u64, mpsc::Sender<RawChange>)>>>,
    next_id: Arc<AtomicU64>,
    channel_capacity: usize,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(channel_capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Push a change to every subscriber of `root`
    ///
    /// Returns the number of subscriptions that accepted the change.
    pub fn emit(&self, root: &Path, change: RawChange) -> usize {
        let Some(subscribers) = self.subscribers.get(root) else {
            return 0;
        };
        subscribers
            .iter()
            .filter(|(_, tx)| match tx.try_send(change.clone()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Dropping raw change event: {}", e);
                    false
                }
            })
            .count()
    }

    /// Number of live subscriptions for `root`
    pub fn subscriber_count(&self, root: &Path) -> usize {
        self.subscribers.get(root).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for ManualSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RawChangeSource for ManualSource {
    fn subscribe(&self, root: &Path, _recursive: bool) -> Result<RawSubscription> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(root.to_path_buf())
            .or_default()
            .push((id, tx));

        Ok(RawSubscription::new(
            rx,
            ManualGuard {
                subscribers: Arc::clone(&self.subscribers),
                root: root.to_path_buf(),
                id,
            },
        ))
    }
}

struct ManualGuard {
    subscribers: Arc<DashMap<PathBuf, Vec<(u64, mpsc::Sender<RawChange>)>>>,
    root: PathBuf,
    id: u64,
}

impl SubscriptionGuard for ManualGuard {
    fn unsubscribe(&mut self) -> Result<()> {
        self.subscribers
            .remove_if_mut(&self.root, |_, subs| {
                subs.retain(|(id, _)| *id != self.id);
                subs.is_empty()
            });
        Ok(())
    }
}
