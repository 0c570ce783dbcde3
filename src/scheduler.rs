use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::Engine;
use crate::observability::SCHEDULER_TICK_DURATION_SECONDS;
use crate::store::WalStore;

/// Background task that moves bookings along as time passes.
///
/// Only one process may run this against a given data directory. A failed tick
/// is logged and the next one tries again.
pub async fn run_status_scheduler(engine: Arc<Engine>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let started = std::time::Instant::now();
        match engine.advance_statuses(Utc::now()).await {
            Ok(changed) if !changed.is_empty() => {
                info!("status scheduler advanced {} bookings", changed.len());
            }
            Ok(_) => {}
            Err(e) => error!("status scheduler tick failed: {e}"),
        }
        metrics::histogram!(SCHEDULER_TICK_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    }
    info!("status scheduler stopped");
}

/// Compact the WAL whenever enough appends have piled up since the last time.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        match store.appends_since_compact().await {
            Ok(n) if n >= threshold => match store.compact().await {
                Ok(()) => info!("compacted wal after {n} appends"),
                Err(e) => error!("wal compaction failed: {e}"),
            },
            Ok(_) => {}
            Err(e) => error!("wal compaction check failed: {e}"),
        }
    }
    info!("compactor stopped");
}
