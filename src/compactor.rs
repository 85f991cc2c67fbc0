use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that rewrites the WAL once enough appends have piled up
/// since the last compaction. Runs until the engine is dropped.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let appends = match engine.wal_appends_since_compact().await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!("compactor: {e}");
                return;
            }
        };
        if appends < threshold {
            continue;
        }

        tracing::debug!(appends, threshold, "compaction threshold reached");
        if let Err(e) = engine.compact_wal().await {
            tracing::error!("compaction failed: {e}");
        }
    }
}
