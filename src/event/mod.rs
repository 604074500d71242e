use crate::cache::MessageSource;
use crate::geo::{GeoPoint, PoiMatch, PointOfInterest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod validation;

pub use validation::{validate, ValidationError};

/// PositionEvent is one location sample of a tracked entity.
///
/// Events are immutable once published. Per entity they are ordered by
/// `sequence_no`; consumers discard anything at or below the last number
/// they processed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionEvent {
    pub entity_id: String,

    /// Monotonic per entity
    pub sequence_no: u64,

    /// Unix epoch milliseconds (producer time)
    pub timestamp: i64,

    pub latitude: f64,
    pub longitude: f64,
}

impl PositionEvent {
    pub fn new(entity_id: impl Into<String>, sequence_no: u64, timestamp: i64, point: GeoPoint) -> Self {
        Self {
            entity_id: entity_id.into(),
            sequence_no,
            timestamp,
            latitude: point.latitude,
            longitude: point.longitude,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }

    pub fn partition(&self, partitions: u32) -> u32 {
        partition_for(&self.entity_id, partitions)
    }
}

/// Stable partition for an entity: first 8 bytes of blake3, modulo `partitions`.
///
/// Every event of one entity lands on the same partition, which is what keeps
/// them in order on the bus.
pub fn partition_for(entity_id: &str, partitions: u32) -> u32 {
    let hash = blake3::hash(entity_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % u64::from(partitions.max(1))) as u32
}

/// Output of the dataflow for one accepted PositionEvent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    /// UUIDv7 (time-ordered)
    pub event_id: Uuid,

    #[serde(flatten)]
    pub position: PositionEvent,

    /// Nearest POI within the match radius
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poi: Option<PointOfInterest>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_distance_m: Option<f64>,

    /// Present only when a notification fired for this event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_source: Option<MessageSource>,

    pub partition: u32,

    pub processed_at: DateTime<Utc>,
}

impl EnrichedEvent {
    pub fn unmatched(position: PositionEvent, partition: u32) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            position,
            poi: None,
            match_distance_m: None,
            message: None,
            message_source: None,
            partition,
            processed_at: Utc::now(),
        }
    }

    pub fn with_match(mut self, matched: PoiMatch) -> Self {
        self.match_distance_m = Some(matched.distance_m);
        self.poi = Some(matched.poi);
        self
    }

    pub fn with_message(mut self, text: String, source: MessageSource) -> Self {
        self.message = Some(text);
        self.message_source = Some(source);
        self
    }

    pub fn entity_id(&self) -> &str {
        &self.position.entity_id
    }

    pub fn is_notification(&self) -> bool {
        self.message.is_some()
    }
}
