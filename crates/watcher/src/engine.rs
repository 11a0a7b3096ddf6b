//! Directory-watch engine
//!
//! The engine wires a [`RawChangeSource`] subscription per watched root to the
//! filtering pipeline (exclude/extension filter, size filter, rate limiter)
//! and then to one of three dispatch modes: debounce, batch or immediate.

use crate::batcher::spawn_batch_ticker;
use crate::events::{ChangeEvent, RawChange};
use crate::filter::ChangeFilter;
use crate::handle::WatchHandle;
use crate::listeners::{ListenerId, Listeners};
use crate::policy::{DispatchMode, WatchPolicy};
use crate::rate_limit::RateLimiter;
use crate::registry::WatchRegistry;
use crate::source::{FsSizeLookup, NotifySource, RawChangeSource, SizeLookup};
use filegate_core::config::EngineConfig;
use filegate_core::error::{Error, Result, ResultExt};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Default length of the shared rate-limit window
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Directory-watch engine
///
/// Cloning an engine yields another handle to the same set of watches.
#[derive(Clone)]
pub struct WatchEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: WatchRegistry,
    pipeline: Arc<Pipeline>,
    source: Arc<dyn RawChangeSource>,
    runtime: Handle,
    shutdown: CancellationToken,
    next_watch_id: AtomicU64,
}

/// Per-event processing shared by every watch
struct Pipeline {
    listeners: Arc<Listeners>,
    rate_limiter: Arc<RateLimiter>,
    sizes: Arc<dyn SizeLookup>,
    runtime: Handle,
}

impl WatchEngine {
    /// Create an engine backed by the OS notification source
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        Self::builder()
            .source(NotifySource::new(config.event_channel_capacity))
            .rate_limit_window(config.rate_limit_window())
            .build()
    }

    /// Create an engine from builder
    pub fn builder() -> WatchEngineBuilder {
        WatchEngineBuilder::default()
    }

    /// Start watching the directory at `path` under `policy`
    ///
    /// Replaces any existing watch on the same directory. Returns as soon as
    /// the subscription is in place; changes are delivered asynchronously.
    pub fn start_watching(&self, path: impl AsRef<Path>, policy: WatchPolicy) -> Result<()> {
        let path = path.as_ref();
        let inner = &self.inner;
        inner.ensure_running()?;

        policy.validate()?;
        let filter = ChangeFilter::from_policy(&policy)?;
        let root = resolve_directory(path)?;

        let handle = inner.registry.install(root.clone(), || {
            inner.ensure_running()?;
            let subscription = inner
                .source
                .subscribe(&root, policy.include_subdirectories)?;
            let id = inner.next_watch_id.fetch_add(1, Ordering::Relaxed);
            let handle = Arc::new(WatchHandle::new(
                id,
                root.clone(),
                policy,
                filter,
                inner.shutdown.child_token(),
                subscription.guard,
            ));
            inner.spawn_watch_tasks(&handle, subscription.events);
            Ok(handle)
        })?;

        // A shutdown that raced with the install must not leave the watch behind.
        if inner.shutdown.is_cancelled() {
            if let Some(handle) = inner.registry.remove(&root) {
                handle.dispose();
            }
            return Err(Error::cancelled("watch engine is shut down"));
        }
        inner.registry.add_alias(absolute_lexical(path), &root);

        info!(
            "Started watch {} on {:?} ({:?})",
            handle.id(),
            root,
            handle.policy().dispatch_mode()
        );
        Ok(())
    }

    /// Stop watching the directory at `path`
    ///
    /// Unknown paths are ignored. Changes that were queued but not yet
    /// delivered are discarded. Once this returns, no callback for the watch
    /// starts.
    pub fn stop_watching(&self, path: impl AsRef<Path>) {
        let root = self.inner.key_for(path.as_ref());
        if let Some(handle) = self.inner.registry.remove(&root) {
            handle.dispose();
            info!("Stopped watch {} on {:?}", handle.id(), root);
        } else {
            trace!("No watch to stop on {:?}", root);
        }
    }

    /// Register a callback for individually delivered changes
    pub fn on_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.inner.pipeline.listeners.add_change(Arc::new(callback))
    }

    /// Register a callback for batches
    pub fn on_batch<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&[ChangeEvent]) + Send + Sync + 'static,
    {
        self.inner.pipeline.listeners.add_batch(Arc::new(callback))
    }

    /// Remove a callback registered with `on_change` or `on_batch`
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.pipeline.listeners.remove(id)
    }

    /// Canonical roots of every active watch, sorted
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.inner.registry.roots()
    }

    /// Whether `path` is the root of an active watch
    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        self.inner.registry.contains(&self.inner.key_for(path.as_ref()))
    }

    /// Policy of the active watch on `path`
    pub fn policy(&self, path: impl AsRef<Path>) -> Option<WatchPolicy> {
        self.inner
            .registry
            .get(&self.inner.key_for(path.as_ref()))
            .map(|handle| handle.policy().as_ref().clone())
    }

    /// Changes queued for a later debounce or batch delivery on `path`
    pub fn pending_count(&self, path: impl AsRef<Path>) -> usize {
        self.inner
            .registry
            .get(&self.inner.key_for(path.as_ref()))
            .map(|handle| handle.pending_count())
            .unwrap_or(0)
    }

    /// Changes accepted by the rate limiter for `path` in the current window
    pub fn accepted_in_window(&self, path: impl AsRef<Path>) -> u32 {
        self.inner
            .pipeline
            .rate_limiter
            .count(&self.inner.key_for(path.as_ref()))
    }

    /// Stop every watch and refuse further `start_watching` calls
    pub fn shutdown(&self) {
        self.inner.shutdown_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for WatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchEngine")
            .field("watches", &self.inner.registry.len())
            .field("listeners", &self.inner.pipeline.listeners.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl EngineInner {
    /// Registry key for `path`
    ///
    /// Once the directory is gone, the path the watch was requested under
    /// still resolves to its canonical root.
    fn key_for(&self, path: &Path) -> PathBuf {
        if let Ok(root) = std::fs::canonicalize(path) {
            return root;
        }
        let requested = absolute_lexical(path);
        self.registry.resolve_alias(&requested).unwrap_or(requested)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::cancelled("watch engine is shut down"));
        }
        Ok(())
    }

    fn spawn_watch_tasks(&self, handle: &Arc<WatchHandle>, events: mpsc::Receiver<RawChange>) {
        self.runtime.spawn(pump_changes(
            Arc::clone(handle),
            events,
            Arc::clone(&self.pipeline),
        ));

        if let DispatchMode::Batch(period) = handle.policy().dispatch_mode() {
            spawn_batch_ticker(
                &self.runtime,
                Arc::clone(handle),
                period,
                Arc::clone(&self.pipeline.listeners),
            );
        }
    }

    fn shutdown_all(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Shutting down watch engine");
        }
        self.shutdown.cancel();
        for handle in self.registry.drain() {
            handle.dispose();
            debug!("Stopped watch {} on {:?}", handle.id(), handle.root());
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

/// Feed one watch's raw changes through the pipeline until it is cancelled
async fn pump_changes(
    handle: Arc<WatchHandle>,
    mut events: mpsc::Receiver<RawChange>,
    pipeline: Arc<Pipeline>,
) {
    loop {
        tokio::select! {
            biased;
            _ = handle.cancelled() => break,
            change = events.recv() => match change {
                Some(raw) => pipeline.process(&handle, raw).await,
                None => {
                    debug!("Raw change stream for {:?} closed", handle.root());
                    break;
                }
            },
        }
    }
    trace!("Change pump for watch {} stopped", handle.id());
}

impl Pipeline {
    async fn process(&self, handle: &Arc<WatchHandle>, raw: RawChange) {
        if !handle.is_active() {
            return;
        }
        let Some(event) = self.admit(handle, raw).await else {
            return;
        };

        let accepted = match handle.policy().dispatch_mode() {
            DispatchMode::Debounce(delay) => {
                handle.enqueue_debounced(event, delay, &self.runtime, &self.listeners)
            }
            DispatchMode::Batch(_) => handle.enqueue(event),
            DispatchMode::Immediate => {
                handle.deliver_change(&event, &self.listeners);
                true
            }
        };
        if !accepted {
            trace!("Watch {} stopped while processing a change", handle.id());
        }
    }

    /// Apply the filter, size bounds and rate limit to a raw change
    async fn admit(&self, handle: &WatchHandle, raw: RawChange) -> Option<ChangeEvent> {
        trace!("Raw {:?} for {:?}", raw.kind, raw.path);

        if !handle.filter().accepts_path(&raw.path) {
            return None;
        }

        // A removed file has no size to check.
        let size = if raw.kind.is_removal() {
            None
        } else {
            match self.sizes.size(&raw.path).await {
                Ok(size) => size,
                Err(e) => {
                    warn!("Failed to read size of {:?}, dropping change: {}", raw.path, e);
                    return None;
                }
            }
        };

        if let Some(size) = size {
            if !handle.filter().accepts_size(size) {
                trace!("Size {} of {:?} is out of bounds", size, raw.path);
                return None;
            }
        }

        if let Some(cap) = handle.policy().max_changes_per_minute {
            if !self.rate_limiter.try_acquire(handle.root(), cap) {
                warn!(
                    "Rate limit of {} changes reached for {:?}, dropping change to {:?}",
                    cap,
                    handle.root(),
                    raw.path
                );
                return None;
            }
        }

        Some(ChangeEvent::new(raw, size.unwrap_or(0), handle.root()))
    }
}

/// Canonicalise `path` and require it to be an existing directory
fn resolve_directory(path: &Path) -> Result<PathBuf> {
    let root = match std::fs::canonicalize(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found(path));
        }
        resolved => resolved.context(format!("Failed to resolve {path:?}"))?,
    };

    if !root.is_dir() {
        return Err(Error::not_found(path));
    }
    Ok(root)
}

/// Absolute form of `path` with `.` and `..` resolved lexically
fn absolute_lexical(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Builder for WatchEngine
pub struct WatchEngineBuilder {
    source: Option<Arc<dyn RawChangeSource>>,
    sizes: Option<Arc<dyn SizeLookup>>,
    rate_limit_window: Duration,
}

impl Default for WatchEngineBuilder {
    fn default() -> Self {
        Self {
            source: None,
            sizes: None,
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
        }
    }
}

impl WatchEngineBuilder {
    /// Set the raw change source (default: [`NotifySource`])
    pub fn source(mut self, source: impl RawChangeSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Set the file size lookup (default: [`FsSizeLookup`])
    pub fn size_lookup(mut self, sizes: impl SizeLookup + 'static) -> Self {
        self.sizes = Some(Arc::new(sizes));
        self
    }

    /// Set the length of the shared rate-limit window
    pub fn rate_limit_window(mut self, window: Duration) -> Self {
        self.rate_limit_window = window;
        self
    }

    /// Build the engine and start the shared rate-limit reset tick
    pub fn build(self) -> Result<WatchEngine> {
        if self.rate_limit_window.is_zero() {
            return Err(Error::invalid_input("rate_limit_window must be non-zero"));
        }

        let runtime = Handle::try_current()
            .map_err(|e| Error::watcher(format!("Watch engine requires a Tokio runtime: {e}")))?;

        let shutdown = CancellationToken::new();
        let rate_limiter = Arc::new(RateLimiter::new());
        rate_limiter.spawn_reset_tick(&runtime, self.rate_limit_window, shutdown.child_token());

        let pipeline = Arc::new(Pipeline {
            listeners: Arc::new(Listeners::default()),
            rate_limiter,
            sizes: self.sizes.unwrap_or_else(|| Arc::new(FsSizeLookup)),
            runtime: runtime.clone(),
        });

        Ok(WatchEngine {
            inner: Arc::new(EngineInner {
                registry: WatchRegistry::new(),
                pipeline,
                source: self
                    .source
                    .unwrap_or_else(|| Arc::new(NotifySource::default())),
                runtime,
                shutdown,
                next_watch_id: AtomicU64::new(1),
            }),
        })
    }
}

impl std::fmt::Debug for WatchEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchEngineBuilder")
            .field("custom_source", &self.source.is_some())
            .field("custom_size_lookup", &self.sizes.is_some())
            .field("rate_limit_window", &self.rate_limit_window)
            .finish()
    }
}
