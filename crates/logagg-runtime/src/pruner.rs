//! Periodic staleness sweep over every live cache.
//!
//! Runs on its own timer, independent of new input. Records whose key stops
//! recurring leave the cache only through this path (or teardown/shutdown).

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::registry::SharedRegistry;

pub async fn run_pruner(registry: SharedRegistry, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; nothing can be stale yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("pruner stopping");
                break;
            }
            _ = ticker.tick() => {
                prune_once(&registry, Utc::now()).await;
            }
        }
    }
}

/// One sweep. Returns the number of records flushed and evicted.
pub async fn prune_once(registry: &SharedRegistry, now: DateTime<Utc>) -> usize {
    let pipelines = registry.lock().await.snapshot();
    if pipelines.is_empty() {
        return 0;
    }

    let sweep = tokio::task::spawn_blocking(move || {
        pipelines.iter().map(|p| p.prune(now)).sum::<usize>()
    });
    match sweep.await {
        Ok(evicted) => {
            if evicted > 0 {
                tracing::debug!(evicted, "prune sweep");
            }
            evicted
        }
        Err(e) => {
            tracing::error!("prune sweep task failed: {e}");
            0
        }
    }
}
