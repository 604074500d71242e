use crate::dataflow::MetricsTracker;
use crate::event::EnrichedEvent;
use crate::sink::{Broadcaster, SubscriberId};
use crate::subscription::protocol::{ClientMessage, EnrichedEventMessage, ErrorMessage, SubscriptionAck};
use axum::extract::ws::{Message, WebSocket};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Manages a single WebSocket connection registered with the broadcaster
pub struct ConnectionManager {
    broadcaster: Arc<Broadcaster>,
    metrics: MetricsTracker,
}

impl ConnectionManager {
    pub fn new(broadcaster: Arc<Broadcaster>, metrics: MetricsTracker) -> Self {
        Self { broadcaster, metrics }
    }

    /// Handle WebSocket connection lifecycle
    pub async fn handle(self, mut socket: WebSocket) {
        let (id, mut events) = self.broadcaster.connect();
        self.metrics.increment_ws_connection();
        info!(subscriber = id, "WebSocket connection established");

        loop {
            tokio::select! {
                msg = socket.recv() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let reply = self.handle_client_message(id, &text);
                            if let Err(e) = socket.send(Message::Text(reply)).await {
                                error!(subscriber = id, error = %e, "Failed to send reply");
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(subscriber = id, "WebSocket client disconnected");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = socket.send(Message::Pong(data)).await {
                                error!(subscriber = id, error = %e, "Failed to send pong");
                                break;
                            }
                        }
                        Some(Ok(_)) => {
                            // Ignore binary, pong messages
                        }
                        Some(Err(e)) => {
                            warn!(subscriber = id, error = %e, "WebSocket error");
                            break;
                        }
                    }
                }

                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if let Err(e) = send_event(&mut socket, &event).await {
                                error!(subscriber = id, error = %e, "Failed to send enriched event");
                                break;
                            }
                        }
                        None => {
                            // Broadcaster evicted us (lagging) or shut down
                            warn!(subscriber = id, "Event stream closed, dropping connection");
                            break;
                        }
                    }
                }
            }
        }

        self.broadcaster.disconnect(id);
        self.metrics.decrement_ws_connection();
        info!(subscriber = id, "WebSocket connection closed");
    }

    /// Apply a subscribe/unsubscribe request and build the JSON reply.
    fn handle_client_message(&self, id: SubscriberId, text: &str) -> String {
        let reply = match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Subscribe { entity_id }) => {
                debug!(subscriber = id, entity_id = %entity_id, "Client subscribed");
                self.broadcaster.subscribe(id, &entity_id);
                serde_json::to_string(&SubscriptionAck::subscribed(entity_id))
            }
            Ok(ClientMessage::Unsubscribe { entity_id }) => {
                debug!(subscriber = id, entity_id = %entity_id, "Client unsubscribed");
                self.broadcaster.unsubscribe(id, &entity_id);
                serde_json::to_string(&SubscriptionAck::unsubscribed(entity_id))
            }
            Err(e) => {
                warn!(subscriber = id, error = %e, "Invalid client message");
                serde_json::to_string(&ErrorMessage::new(format!("invalid message: {}", e)))
            }
        };
        reply.unwrap_or_else(|_| r#"{"type":"error","error":"internal"}"#.to_string())
    }
}

async fn send_event(socket: &mut WebSocket, event: &EnrichedEvent) -> anyhow::Result<()> {
    let json = serde_json::to_string(&EnrichedEventMessage::from(event))?;
    socket.send(Message::Text(json)).await?;
    Ok(())
}
