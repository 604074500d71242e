// WebSocket subscriptions to enriched events

pub mod manager;
pub mod protocol;

pub use manager::ConnectionManager;
pub use protocol::{ClientMessage, EnrichedEventMessage, ErrorMessage, SubscriptionAck};
