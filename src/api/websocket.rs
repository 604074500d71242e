use super::ApiState;
use crate::subscription::ConnectionManager;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
};
use std::sync::Arc;
use tracing::info;

/// GET /api/ws - live enriched events
///
/// New connections receive nothing until they subscribe to an entity id or `"*"`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> Response {
    info!("WebSocket upgrade request received");
    let manager = ConnectionManager::new(Arc::clone(&state.broadcaster), state.metrics.clone());
    ws.on_upgrade(move |socket| manager.handle(socket))
}
