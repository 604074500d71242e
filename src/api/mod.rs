// HTTP and WebSocket APIs

pub mod status;
pub mod websocket;

pub use status::{health, metrics};
pub use websocket::ws_handler;

use crate::cache::MessageCache;
use crate::dataflow::MetricsTracker;
use crate::geo::SharedIndex;
use crate::sink::Broadcaster;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared application state for the HTTP surface
#[derive(Clone)]
pub struct ApiState {
    pub metrics: MetricsTracker,
    pub cache: Arc<MessageCache>,
    pub broadcaster: Arc<Broadcaster>,
    pub index: Arc<SharedIndex>,
    /// Window for the active entity count
    pub active_window_seconds: i64,
}

/// Build the router: `/health`, `/api/metrics` and `/api/ws`.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/metrics", get(metrics))
        .route("/api/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}
