use crate::event::EnrichedEvent;
use serde::{Deserialize, Serialize};

/// Client → Server message types
///
/// `entity_id` may be `"*"` to follow every entity.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { entity_id: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { entity_id: String },
}

/// Server → Client: one enriched event
#[derive(Debug, Serialize)]
pub struct EnrichedEventMessage<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(flatten)]
    pub event: &'a EnrichedEvent,
}

impl<'a> From<&'a EnrichedEvent> for EnrichedEventMessage<'a> {
    fn from(event: &'a EnrichedEvent) -> Self {
        Self {
            msg_type: "enriched_event",
            event,
        }
    }
}

/// Server → Client: subscribe/unsubscribe confirmation
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionAck {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub entity_id: String,
}

impl SubscriptionAck {
    pub fn subscribed(entity_id: String) -> Self {
        Self {
            msg_type: "subscribed".to_string(),
            entity_id,
        }
    }

    pub fn unsubscribed(entity_id: String) -> Self {
        Self {
            msg_type: "unsubscribed".to_string(),
            entity_id,
        }
    }
}

/// Server → Client: Error message
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: String) -> Self {
        Self {
            msg_type: "error".to_string(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PositionEvent;
    use crate::geo::GeoPoint;

    #[test]
    fn test_parse_client_messages() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"subscribe","entity_id":"user_3"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { entity_id } if entity_id == "user_3"));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"unsubscribe","entity_id":"*"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unsubscribe { entity_id } if entity_id == "*"));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"shout"}"#).is_err());
    }

    #[test]
    fn test_enriched_event_message_is_flat() {
        let event = EnrichedEvent::unmatched(
            PositionEvent::new("user_3", 7, 1_707_668_400_000, GeoPoint::new(45.46, 9.19)),
            2,
        );
        let json = serde_json::to_value(EnrichedEventMessage::from(&event)).unwrap();
        assert_eq!(json["type"], "enriched_event");
        assert_eq!(json["entity_id"], "user_3");
        assert_eq!(json["sequence_no"], 7);
        assert_eq!(json["partition"], 2);
    }
}
