//! Background WAL compaction. Checks the append counter on an interval and
//! rewrites the log once enough churn has accumulated.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut ticker = tokio::time::interval(CHECK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        tracing::info!(appends, threshold, "compacting WAL");
        match engine.compact_wal().await {
            Ok(()) => tracing::info!("WAL compaction complete"),
            Err(e) => tracing::error!(error = %e, "WAL compaction failed"),
        }
    }
}
