//! Fixed-period batch delivery
//!
//! In batch mode a watch queues accepted changes without touching any timer.
//! A repeating ticker armed at watch start drains the queue each period and
//! delivers the drained changes as one batch. Empty periods deliver nothing.

use crate::handle::WatchHandle;
use crate::listeners::Listeners;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Spawn the batch ticker for `handle`; it stops when the watch is cancelled
pub(crate) fn spawn_batch_ticker(
    runtime: &Handle,
    handle: Arc<WatchHandle>,
    period: Duration,
    listeners: Arc<Listeners>,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = handle.cancelled() => break,
                _ = ticker.tick() => {
                    let batch = handle.drain_pending();
                    if batch.is_empty() {
                        trace!("Batch tick for {:?} with nothing queued", handle.root());
                        continue;
                    }
                    debug!("Flushing batch of {} changes for {:?}", batch.len(), handle.root());
                    handle.deliver_batch(&batch, &listeners);
                }
            }
        }
        trace!("Batch ticker for {:?} stopped", handle.root());
    })
}
