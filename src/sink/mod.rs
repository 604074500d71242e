// Persistence and live fan-out of enriched events

mod broadcaster;
mod clickhouse;
mod jsonl;
mod writer;

pub use broadcaster::{Broadcaster, SubscriberId, ALL_ENTITIES};
pub use clickhouse::ClickHouseStore;
pub use jsonl::JsonLinesStore;
pub use writer::{sink_channel, SinkHandle, SinkSettings, SinkWriter};

use crate::event::EnrichedEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("analytics store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("analytics store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("analytics store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode row: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One row of the `user_events` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRow {
    pub event_id: String,
    /// `YYYY-MM-DD HH:MM:SS.mmm` UTC, from the producer timestamp
    pub event_time: String,
    pub user_id: String,
    pub sequence_no: u64,
    pub latitude: f64,
    pub longitude: f64,
    /// Distance to the matched POI in metres, 0 when unmatched
    pub poi_range: f64,
    pub poi_name: String,
    /// Notification text, empty when none fired
    pub poi_info: String,
    pub message_source: String,
    pub partition: u32,
}

impl From<&EnrichedEvent> for AnalyticsRow {
    fn from(event: &EnrichedEvent) -> Self {
        let event_time = chrono::DateTime::from_timestamp_millis(event.position.timestamp)
            .unwrap_or(event.processed_at)
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string();
        let message_source = event
            .message_source
            .and_then(|source| serde_json::to_value(source).ok())
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();

        Self {
            event_id: event.event_id.to_string(),
            event_time,
            user_id: event.position.entity_id.clone(),
            sequence_no: event.position.sequence_no,
            latitude: event.position.latitude,
            longitude: event.position.longitude,
            poi_range: event.match_distance_m.unwrap_or(0.0),
            poi_name: event.poi.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
            poi_info: event.message.clone().unwrap_or_default(),
            message_source,
            partition: event.partition,
        }
    }
}

/// Append-only analytics store.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn append(&self, batch: &[AnalyticsRow]) -> Result<(), StoreError>;

    fn name(&self) -> &str;
}

/// Store that accepts and forgets every batch (`sink.kind = "none"`).
#[derive(Debug, Default, Clone)]
pub struct DiscardStore;

#[async_trait]
impl AnalyticsStore for DiscardStore {
    async fn append(&self, _batch: &[AnalyticsRow]) -> Result<(), StoreError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "none"
    }
}
