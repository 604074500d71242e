use super::NatsConfig;
use crate::event::PositionEvent;
use anyhow::{Context, Result};
use async_nats::jetstream;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Sink for position events on their way to the bus.
#[async_trait]
pub trait PositionPublisher: Send + Sync {
    async fn publish(&self, event: &PositionEvent) -> Result<()>;
}

/// Event publisher for NATS JetStream
#[derive(Clone)]
pub struct EventPublisher {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl EventPublisher {
    pub fn new(jetstream: jetstream::Context, config: NatsConfig) -> Self {
        Self { jetstream, config }
    }
}

#[async_trait]
impl PositionPublisher for EventPublisher {
    /// Subject format: `{subject_prefix}.p{partition}`.
    /// Waits for the JetStream ack so a returned `Ok` means the event is durable.
    async fn publish(&self, event: &PositionEvent) -> Result<()> {
        let partition = event.partition(self.config.partitions);
        let subject = self.config.subject_for(partition);
        let payload = serde_json::to_vec(event).context("Failed to serialize event to JSON")?;

        debug!(
            entity_id = %event.entity_id,
            sequence_no = event.sequence_no,
            subject = %subject,
            "Publishing position event"
        );

        self.jetstream
            .publish(subject.clone(), payload.into())
            .await
            .with_context(|| format!("Failed to publish event to subject '{}'", subject))?
            .await
            .context("Failed to await publish ack")?;

        Ok(())
    }
}

/// In-process publisher feeding an mpsc channel (tests, single-binary demos).
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<PositionEvent>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<PositionEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl PositionPublisher for ChannelPublisher {
    async fn publish(&self, event: &PositionEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .await
            .context("Position channel closed")
    }
}
