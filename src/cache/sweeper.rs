use super::MessageCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Periodically drop expired cache entries.
///
/// Expiry is already enforced lazily on read; this only bounds memory held by
/// keys that are never asked for again.
pub async fn run_sweeper(
    cache: Arc<MessageCache>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_secs = interval_secs, "Cache sweeper started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(removed = removed, remaining = cache.len(), "Swept expired cache entries");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Cache sweeper stopped");
}
