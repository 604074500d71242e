use crate::cache::MessageSource;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Width of the event-rate window (seconds)
const RATE_WINDOW_SECS: i64 = 5;

/// One spare bucket so the second being reset is never inside the window
const RATE_BUCKETS: usize = RATE_WINDOW_SECS as usize + 1;

/// Pipeline counters shared by workers, the sink writer and the API.
#[derive(Clone, Default)]
pub struct MetricsTracker {
    inner: Arc<Counters>,

    /// Per-second event counts, indexed by `second % RATE_BUCKETS`
    rate: Arc<RateWindow>,

    /// Active entities (entity_id -> last_seen_timestamp_ms)
    active_entities: Arc<DashMap<String, i64>>,
}

#[derive(Default)]
struct Counters {
    events_processed: AtomicU64,
    duplicates_discarded: AtomicU64,
    invalid_events: AtomicU64,
    poi_matches: AtomicU64,
    notifications: AtomicU64,
    messages_cached: AtomicU64,
    messages_generated: AtomicU64,
    messages_coalesced: AtomicU64,
    messages_fallback: AtomicU64,
    index_errors: AtomicU64,
    sink_written: AtomicU64,
    sink_dropped: AtomicU64,
    sink_failed_batches: AtomicU64,
    broadcast_dropped: AtomicU64,
    websocket_connections: AtomicU64,
}

#[derive(Default)]
struct RateBucket {
    second: AtomicI64,
    count: AtomicU64,
}

#[derive(Default)]
struct RateWindow {
    buckets: [RateBucket; RATE_BUCKETS],
}

impl RateWindow {
    fn record(&self, now_ms: i64) {
        let second = now_ms.div_euclid(1000);
        let bucket = &self.buckets[second.rem_euclid(RATE_BUCKETS as i64) as usize];
        let seen = bucket.second.load(Ordering::Acquire);
        // Whoever moves the bucket to the new second resets it. An increment
        // racing with that reset can be lost; the rate is approximate.
        if seen != second
            && bucket
                .second
                .compare_exchange(seen, second, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            bucket.count.store(0, Ordering::Release);
        }
        bucket.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Events in the last `RATE_WINDOW_SECS` whole seconds, current one included.
    fn count(&self, now_ms: i64) -> u64 {
        let current = now_ms.div_euclid(1000);
        self.buckets
            .iter()
            .filter(|bucket| {
                let second = bucket.second.load(Ordering::Acquire);
                second <= current && current - second < RATE_WINDOW_SECS
            })
            .map(|bucket| bucket.count.load(Ordering::Relaxed))
            .sum()
    }
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted position event
    pub fn record_event(&self, entity_id: &str) {
        self.record_event_at(entity_id, Utc::now().timestamp_millis());
    }

    fn record_event_at(&self, entity_id: &str, now_ms: i64) {
        self.inner.events_processed.fetch_add(1, Ordering::Relaxed);
        self.rate.record(now_ms);

        match self.active_entities.get_mut(entity_id) {
            Some(mut last_seen) => *last_seen = (*last_seen).max(now_ms),
            None => {
                self.active_entities.insert(entity_id.to_string(), now_ms);
            }
        }
    }

    pub fn record_duplicate(&self) {
        self.inner.duplicates_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.inner.invalid_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match(&self) {
        self.inner.poi_matches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification(&self, source: MessageSource) {
        self.inner.notifications.fetch_add(1, Ordering::Relaxed);
        let counter = match source {
            MessageSource::Cached => &self.inner.messages_cached,
            MessageSource::Generated => &self.inner.messages_generated,
            MessageSource::Coalesced => &self.inner.messages_coalesced,
            MessageSource::Fallback => &self.inner.messages_fallback,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_index_error(&self) {
        self.inner.index_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_written(&self, rows: usize) {
        self.inner.sink_written.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn record_sink_dropped(&self, rows: usize) {
        self.inner.sink_dropped.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn record_sink_failed_batch(&self) {
        self.inner.sink_failed_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast_dropped(&self, subscribers: usize) {
        self.inner
            .broadcast_dropped
            .fetch_add(subscribers as u64, Ordering::Relaxed);
    }

    pub fn increment_ws_connection(&self) {
        self.inner.websocket_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_ws_connection(&self) {
        self.inner.websocket_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get_ws_connection_count(&self) -> u64 {
        self.inner.websocket_connections.load(Ordering::Relaxed)
    }

    pub fn get_total_events(&self) -> u64 {
        self.inner.events_processed.load(Ordering::Relaxed)
    }

    /// Events per second over the last 5 seconds
    pub fn get_event_rate(&self) -> f64 {
        self.rate.count(Utc::now().timestamp_millis()) as f64 / RATE_WINDOW_SECS as f64
    }

    /// Entities seen within the window
    pub fn get_active_entity_count(&self, window_seconds: i64) -> usize {
        let threshold = Utc::now().timestamp_millis() - window_seconds * 1000;
        self.active_entities
            .iter()
            .filter(|entry| *entry.value() > threshold)
            .count()
    }

    /// Forget entities not seen within the window. Returns how many were removed.
    pub fn prune_inactive(&self, window_seconds: i64) -> usize {
        self.prune_inactive_at(window_seconds, Utc::now().timestamp_millis())
    }

    fn prune_inactive_at(&self, window_seconds: i64, now_ms: i64) -> usize {
        let threshold = now_ms - window_seconds * 1000;
        let before = self.active_entities.len();
        self.active_entities.retain(|_, last_seen| *last_seen > threshold);
        before.saturating_sub(self.active_entities.len())
    }

    /// Entities currently remembered, active or not
    pub fn tracked_entity_count(&self) -> usize {
        self.active_entities.len()
    }

    pub fn get_snapshot(&self, active_window_seconds: i64) -> MetricsSnapshot {
        let c = &self.inner;
        MetricsSnapshot {
            events_processed: c.events_processed.load(Ordering::Relaxed),
            duplicates_discarded: c.duplicates_discarded.load(Ordering::Relaxed),
            invalid_events: c.invalid_events.load(Ordering::Relaxed),
            poi_matches: c.poi_matches.load(Ordering::Relaxed),
            notifications: c.notifications.load(Ordering::Relaxed),
            messages: MessageCounts {
                cached: c.messages_cached.load(Ordering::Relaxed),
                generated: c.messages_generated.load(Ordering::Relaxed),
                coalesced: c.messages_coalesced.load(Ordering::Relaxed),
                fallback: c.messages_fallback.load(Ordering::Relaxed),
            },
            index_errors: c.index_errors.load(Ordering::Relaxed),
            sink_written: c.sink_written.load(Ordering::Relaxed),
            sink_dropped: c.sink_dropped.load(Ordering::Relaxed),
            sink_failed_batches: c.sink_failed_batches.load(Ordering::Relaxed),
            broadcast_dropped: c.broadcast_dropped.load(Ordering::Relaxed),
            websocket_connections: c.websocket_connections.load(Ordering::Relaxed),
            event_rate: self.get_event_rate(),
            active_entities: self.get_active_entity_count(active_window_seconds),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageCounts {
    pub cached: u64,
    pub generated: u64,
    pub coalesced: u64,
    pub fallback: u64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub events_processed: u64,
    pub duplicates_discarded: u64,
    pub invalid_events: u64,
    pub poi_matches: u64,
    pub notifications: u64,
    pub messages: MessageCounts,
    pub index_errors: u64,
    pub sink_written: u64,
    pub sink_dropped: u64,
    pub sink_failed_batches: u64,
    pub broadcast_dropped: u64,
    pub websocket_connections: u64,
    pub event_rate: f64,
    pub active_entities: usize,
}
