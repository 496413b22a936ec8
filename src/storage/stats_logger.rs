use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use crate::shutdown::ShutdownSignal;

use super::kv_store::StorageHandler;

const STATS_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Log RocksDB and process memory figures every interval until shutdown
pub async fn start_stats_logger(storage: StorageHandler, shutdown: ShutdownSignal) {
    let mut ticker = interval(STATS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => storage.print_perf_snapshot(),
            _ = shutdown.triggered() => break,
        }
    }

    debug!("stats logger stopped");
}
