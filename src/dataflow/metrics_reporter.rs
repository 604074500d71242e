use super::MetricsTracker;
use crate::cache::MessageCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Periodically log a metrics snapshot and forget entities idle past the
/// active window.
pub async fn run_metrics_reporter(
    metrics: MetricsTracker,
    cache: Arc<MessageCache>,
    interval_seconds: u64,
    active_window_seconds: i64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_secs(interval_seconds.max(1)));

    // Skip missed ticks to prevent backlog under load
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let pruned = metrics.prune_inactive(active_window_seconds);
                if pruned > 0 {
                    debug!(pruned, remaining = metrics.tracked_entity_count(), "Pruned inactive entities");
                }
                let snapshot = metrics.get_snapshot(active_window_seconds);
                let cache_stats = cache.stats();
                info!(
                    events = snapshot.events_processed,
                    rate = snapshot.event_rate,
                    active_entities = snapshot.active_entities,
                    matches = snapshot.poi_matches,
                    notifications = snapshot.notifications,
                    duplicates = snapshot.duplicates_discarded,
                    invalid = snapshot.invalid_events,
                    index_errors = snapshot.index_errors,
                    cache_size = cache_stats.size,
                    cache_hits = cache_stats.hits,
                    cache_misses = cache_stats.misses,
                    fallbacks = cache_stats.fallbacks,
                    sink_dropped = snapshot.sink_dropped,
                    "Pipeline metrics"
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSettings;

    #[tokio::test(start_paused = true)]
    async fn test_reporter_prunes_idle_entities() {
        let metrics = MetricsTracker::new();
        metrics.record_event("user_1");
        assert_eq!(metrics.tracked_entity_count(), 1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cache = Arc::new(MessageCache::new(CacheSettings::default()));
        // A zero window treats every entity as idle
        let reporter = tokio::spawn(run_metrics_reporter(metrics.clone(), cache, 1, 0, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(metrics.tracked_entity_count(), 0);

        shutdown_tx.send(true).unwrap();
        reporter.await.unwrap();
    }
}
