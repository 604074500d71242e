// NATS JetStream event bus

mod client;
mod publisher;

pub use client::{NatsClient, NatsConfig};
pub use publisher::{ChannelPublisher, EventPublisher, PositionPublisher};
