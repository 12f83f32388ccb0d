//! Long-running "flush on a timer, close on cancellation" task.
//!
//! [`run_periodic_maintenance`] owns a cache for its whole session: it
//! flushes every `period`, flushes again whenever memory pressure is
//! signalled, and when cancelled performs one final flush and the close.
//! Cache calls block on disk IO, so each one is dispatched to the blocking
//! pool instead of running on a runtime worker.

use std::sync::Arc;
use std::time::Duration;

use larder_core::ManagedCache;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::memory::{MemoryPressure, MemoryPressureMonitor};

/// Runs periodic flushes for `cache` until `cancel` fires, then flushes and
/// closes it.
///
/// The memory-pressure subscription is dropped after the close. If the
/// pressure channel closes early, the task keeps flushing on the timer.
pub async fn run_periodic_maintenance<K, V>(
    cache: Arc<dyn ManagedCache<K, V>>,
    period: Duration,
    mut pressure: broadcast::Receiver<MemoryPressure>,
    cancel: CancellationToken,
) where
    K: 'static,
    V: 'static,
{
    let period = period.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pressure_open = true;

    debug!(cache = %cache.name(), ?period, "periodic maintenance started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => flush(&cache, "periodic").await,
            event = pressure.recv(), if pressure_open => match event {
                Ok(level) => {
                    debug!(cache = %cache.name(), ?level, "flushing on memory pressure");
                    flush(&cache, "memory pressure").await;
                }
                Err(RecvError::Lagged(missed)) => {
                    debug!(cache = %cache.name(), missed, "memory pressure events coalesced");
                    flush(&cache, "memory pressure").await;
                }
                Err(RecvError::Closed) => pressure_open = false,
            },
        }
    }

    let closing = Arc::clone(&cache);
    let result = tokio::task::spawn_blocking(move || {
        closing.force();
        closing.close();
    })
    .await;
    if let Err(err) = result {
        warn!(cache = %cache.name(), error = %err, "final flush and close failed");
    }
    drop(pressure);

    info!(cache = %cache.name(), "periodic maintenance stopped; cache closed");
}

/// Spawns [`run_periodic_maintenance`] on the current runtime.
pub fn spawn_periodic_maintenance<K, V>(
    cache: Arc<dyn ManagedCache<K, V>>,
    period: Duration,
    monitor: &MemoryPressureMonitor,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    K: 'static,
    V: 'static,
{
    tokio::spawn(run_periodic_maintenance(
        cache,
        period,
        monitor.subscribe(),
        cancel,
    ))
}

async fn flush<K: 'static, V: 'static>(cache: &Arc<dyn ManagedCache<K, V>>, reason: &'static str) {
    let flushing = Arc::clone(cache);
    if let Err(err) = tokio::task::spawn_blocking(move || flushing.force()).await {
        warn!(cache = %cache.name(), reason, error = %err, "maintenance flush failed");
    }
}
