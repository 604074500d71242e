use super::composer::MessageComposer;
use super::metrics::MetricsTracker;
use super::proximity::{ProximityPolicy, ProximityTracker};
use crate::event::{EnrichedEvent, PositionEvent, ValidationError};
use crate::geo::{select_nearest, PoiMatch, SpatialIndex};
use crate::sink::{Broadcaster, SinkHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Where enriched events go once a worker is done with them.
#[derive(Clone)]
pub struct Downstream {
    pub sink: SinkHandle,
    pub broadcaster: Arc<Broadcaster>,
}

impl Downstream {
    /// Hand off to the sink queue and live subscribers. Never waits.
    pub fn emit(&self, event: &EnrichedEvent) {
        self.sink.submit(event);
        self.broadcaster.publish(event);
    }
}

/// Result of processing one position event.
#[derive(Debug)]
pub enum Outcome {
    Enriched(Box<EnrichedEvent>),
    /// Redelivered or out-of-order, discarded
    Duplicate,
    Invalid(ValidationError),
}

/// Processes one bus partition strictly in order.
///
/// Holds the partition's proximity arena; shared collaborators (index, cache)
/// are reached through `Arc`s.
pub struct PartitionWorker {
    partition: u32,
    tracker: ProximityTracker,
    index: Arc<dyn SpatialIndex>,
    composer: MessageComposer,
    index_timeout: Duration,
    metrics: MetricsTracker,
}

impl PartitionWorker {
    pub fn new(
        partition: u32,
        policy: ProximityPolicy,
        index: Arc<dyn SpatialIndex>,
        composer: MessageComposer,
        index_timeout: Duration,
        metrics: MetricsTracker,
    ) -> Self {
        Self {
            partition,
            tracker: ProximityTracker::new(policy),
            index,
            composer,
            index_timeout,
            metrics,
        }
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn tracker(&self) -> &ProximityTracker {
        &self.tracker
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    pub async fn process(&mut self, event: PositionEvent) -> Outcome {
        if let Err(e) = event.validate() {
            warn!(
                partition = self.partition,
                entity_id = %event.entity_id,
                error = %e,
                "Invalid position event, skipping"
            );
            self.metrics.record_invalid();
            return Outcome::Invalid(e);
        }

        if !self
            .tracker
            .accept_sequence(&event.entity_id, event.sequence_no, event.timestamp)
        {
            debug!(
                partition = self.partition,
                entity_id = %event.entity_id,
                sequence_no = event.sequence_no,
                "Duplicate or out-of-order event, discarding"
            );
            self.metrics.record_duplicate();
            return Outcome::Duplicate;
        }

        self.metrics.record_event(&event.entity_id);
        let entity_id = event.entity_id.clone();
        let now = event.timestamp;
        if let Some(pruned) = self.tracker.sweep_if_due(now).filter(|n| *n > 0) {
            debug!(partition = self.partition, pruned, "Forgot idle entities");
        }

        let Some(nearby) = self.query_nearby(&event).await else {
            return Outcome::Enriched(Box::new(EnrichedEvent::unmatched(event, self.partition)));
        };

        let policy = *self.tracker.policy();
        let nearest = select_nearest(
            nearby
                .iter()
                .filter(|m| m.distance_m <= policy.radius_m)
                .cloned()
                .collect(),
        );
        let fires = self.tracker.advance(&entity_id, now, &nearby, nearest.as_ref());

        let mut enriched = EnrichedEvent::unmatched(event, self.partition);
        let Some(matched) = nearest else {
            return Outcome::Enriched(Box::new(enriched));
        };
        self.metrics.record_match();

        if fires {
            let resolved = self.composer.compose(&entity_id, &matched, now).await;
            self.tracker.confirm(&entity_id, matched.poi.poi_id, now);
            self.metrics.record_notification(resolved.source);
            info!(
                partition = self.partition,
                entity_id = %entity_id,
                poi_id = matched.poi.poi_id,
                distance_m = matched.distance_m,
                source = ?resolved.source,
                "Notification fired"
            );
            enriched = enriched
                .with_match(matched)
                .with_message(resolved.text, resolved.source);
        } else {
            enriched = enriched.with_match(matched);
        }

        Outcome::Enriched(Box::new(enriched))
    }

    /// Process and emit. Returns the outcome so callers can ack afterwards.
    pub async fn handle(&mut self, event: PositionEvent, downstream: &Downstream) -> Outcome {
        let outcome = self.process(event).await;
        if let Outcome::Enriched(enriched) = &outcome {
            downstream.emit(enriched);
        }
        outcome
    }

    /// POIs within the exit radius, or None when the index failed.
    async fn query_nearby(&self, event: &PositionEvent) -> Option<Vec<PoiMatch>> {
        let radius = self.tracker.policy().exit_radius_m;
        match timeout(self.index_timeout, self.index.query(event.point(), radius)).await {
            Ok(Ok(matches)) => Some(matches),
            Ok(Err(e)) => {
                warn!(
                    partition = self.partition,
                    entity_id = %event.entity_id,
                    error = %e,
                    "Spatial index query failed, emitting without match"
                );
                self.metrics.record_index_error();
                None
            }
            Err(_) => {
                warn!(
                    partition = self.partition,
                    entity_id = %event.entity_id,
                    timeout_ms = self.index_timeout.as_millis() as u64,
                    "Spatial index query timed out, emitting without match"
                );
                self.metrics.record_index_error();
                None
            }
        }
    }
}
