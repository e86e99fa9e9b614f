use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::Engine;

/// How often lapsed leases are swept.
pub const LEASE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// How often the journal size is checked against the compaction threshold.
pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that drops leases whose holder never released them and
/// wakes anyone queued behind them.
pub async fn run_lease_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let purged = engine.locks().purge_expired(tokio::time::Instant::now());
        if purged > 0 {
            metrics::counter!(crate::observability::LEASES_REAPED_TOTAL).increment(purged as u64);
            info!("reaped {purged} lapsed office leases");
        }
    }
}

/// Background task that compacts the journal once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, every: Duration) {
    let threshold = engine.config().compact_threshold;
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if compact_if_due(&engine, threshold).await {
            debug!("journal compaction pass done");
        }
    }
}

/// Compact when `threshold` appends have accumulated. Returns whether it ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.journal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_journal().await {
        Ok(()) => true,
        Err(e) => {
            warn!("journal compaction after {appends} appends failed: {e}");
            false
        }
    }
}

/// Start both maintenance loops with their default intervals.
pub fn spawn_maintenance(engine: &Arc<Engine>) -> (JoinHandle<()>, JoinHandle<()>) {
    let leases = tokio::spawn(run_lease_reaper(engine.clone(), LEASE_SWEEP_INTERVAL));
    let compactor = tokio::spawn(run_compactor(engine.clone(), COMPACT_CHECK_INTERVAL));
    (leases, compactor)
}
