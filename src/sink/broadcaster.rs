use crate::dataflow::MetricsTracker;
use crate::event::EnrichedEvent;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Topic matching every entity.
pub const ALL_ENTITIES: &str = "*";

pub type SubscriberId = u64;

struct Subscriber {
    tx: mpsc::Sender<Arc<EnrichedEvent>>,
    topics: HashSet<String>,
}

/// Fan-out of enriched events to live subscribers.
///
/// Each subscriber owns a bounded channel. Delivery never waits: a subscriber
/// whose channel is full or closed is disconnected on the spot.
pub struct Broadcaster {
    next_id: AtomicU64,
    subscribers: DashMap<SubscriberId, Subscriber>,
    buffer: usize,
    metrics: MetricsTracker,
}

impl Broadcaster {
    pub fn new(buffer: usize, metrics: MetricsTracker) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: DashMap::new(),
            buffer: buffer.max(1),
            metrics,
        }
    }

    /// Register a subscriber with no topics yet.
    pub fn connect(&self) -> (SubscriberId, mpsc::Receiver<Arc<EnrichedEvent>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers.insert(
            id,
            Subscriber {
                tx,
                topics: HashSet::new(),
            },
        );
        (id, rx)
    }

    /// Add `entity_id` (or [`ALL_ENTITIES`]) to the subscriber's topics.
    /// Returns false when the subscriber is gone.
    pub fn subscribe(&self, id: SubscriberId, entity_id: &str) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(mut subscriber) => {
                subscriber.topics.insert(entity_id.to_string());
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, id: SubscriberId, entity_id: &str) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(mut subscriber) => subscriber.topics.remove(entity_id),
            None => false,
        }
    }

    pub fn disconnect(&self, id: SubscriberId) {
        self.subscribers.remove(&id);
    }

    pub fn is_connected(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver to every interested subscriber. Returns how many received it.
    pub fn publish(&self, event: &EnrichedEvent) -> usize {
        let entity_id = event.entity_id();
        let mut shared: Option<Arc<EnrichedEvent>> = None;
        let mut delivered = 0;
        let mut evicted = Vec::new();

        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if !subscriber.topics.contains(entity_id) && !subscriber.topics.contains(ALL_ENTITIES) {
                continue;
            }

            let payload = shared.get_or_insert_with(|| Arc::new(event.clone())).clone();
            match subscriber.tx.try_send(payload) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = *entry.key(), entity_id = %entity_id, "Subscriber lagging, disconnecting");
                    evicted.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = *entry.key(), "Subscriber channel closed");
                    evicted.push(*entry.key());
                }
            }
        }

        if !evicted.is_empty() {
            for id in &evicted {
                self.subscribers.remove(id);
            }
            self.metrics.record_broadcast_dropped(evicted.len());
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PositionEvent;
    use crate::geo::GeoPoint;

    fn event(entity_id: &str, seq: u64) -> EnrichedEvent {
        EnrichedEvent::unmatched(
            PositionEvent::new(entity_id, seq, 1_700_000_000_000, GeoPoint::new(45.46, 9.19)),
            0,
        )
    }

    #[tokio::test]
    async fn test_delivers_by_entity_and_wildcard() {
        let broadcaster = Broadcaster::new(8, MetricsTracker::new());
        let (alice, mut alice_rx) = broadcaster.connect();
        let (all, mut all_rx) = broadcaster.connect();
        let (_idle, mut idle_rx) = broadcaster.connect();

        broadcaster.subscribe(alice, "user_1");
        broadcaster.subscribe(all, ALL_ENTITIES);

        assert_eq!(broadcaster.publish(&event("user_1", 1)), 2);
        assert_eq!(broadcaster.publish(&event("user_2", 2)), 1);

        assert_eq!(alice_rx.try_recv().unwrap().position.sequence_no, 1);
        assert!(alice_rx.try_recv().is_err());
        assert_eq!(all_rx.try_recv().unwrap().position.sequence_no, 1);
        assert_eq!(all_rx.try_recv().unwrap().position.sequence_no, 2);
        assert!(idle_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_subscriber_is_dropped() {
        let metrics = MetricsTracker::new();
        let broadcaster = Broadcaster::new(1, metrics.clone());
        let (slow, mut slow_rx) = broadcaster.connect();
        let (fast, mut fast_rx) = broadcaster.connect();
        broadcaster.subscribe(slow, ALL_ENTITIES);
        broadcaster.subscribe(fast, ALL_ENTITIES);

        broadcaster.publish(&event("user_1", 1));
        fast_rx.try_recv().unwrap();

        // slow never drained its single slot
        assert_eq!(broadcaster.publish(&event("user_1", 2)), 1);
        assert!(!broadcaster.is_connected(slow));
        assert!(broadcaster.is_connected(fast));
        assert_eq!(metrics.get_snapshot(10).broadcast_dropped, 1);

        // The evicted subscriber still gets what was buffered, then the channel ends
        assert_eq!(slow_rx.recv().await.unwrap().position.sequence_no, 1);
        assert!(slow_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_dropped() {
        let broadcaster = Broadcaster::new(4, MetricsTracker::new());
        let (id, rx) = broadcaster.connect();
        broadcaster.subscribe(id, "user_1");
        drop(rx);

        assert_eq!(broadcaster.publish(&event("user_1", 1)), 0);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_and_disconnect() {
        let broadcaster = Broadcaster::new(4, MetricsTracker::new());
        let (id, _rx) = broadcaster.connect();
        assert!(broadcaster.subscribe(id, "user_1"));
        assert!(broadcaster.unsubscribe(id, "user_1"));
        assert!(!broadcaster.unsubscribe(id, "user_1"));

        broadcaster.disconnect(id);
        assert!(!broadcaster.subscribe(id, "user_1"));
    }
}
