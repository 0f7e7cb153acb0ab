use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::now_ms;

/// Background task that fires due verification transitions.
pub async fn run_verifier(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_millis(engine.config.verifier_poll_ms));
    loop {
        interval.tick().await;
        let due = engine.collect_due_verifications(now_ms());
        if due.is_empty() {
            continue;
        }
        metrics::counter!(crate::observability::VERIFIER_SWEEPS_TOTAL).increment(1);
        for listing_id in due {
            match engine.fire_verification(listing_id).await {
                Ok(true) => {}
                // Settled by a vacancy loss or dispute in the meantime —
                // that's fine, the status re-check won.
                Ok(false) => tracing::debug!("verifier skip {listing_id}: already settled"),
                // Fired tasks are never retried; a lost verification is
                // acceptable staleness, a duplicate credit is not.
                Err(e) => tracing::warn!("verifier skip {listing_id}: {e}"),
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
