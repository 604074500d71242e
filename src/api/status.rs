use super::ApiState;
use crate::cache::CacheStats;
use crate::dataflow::MetricsSnapshot;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pois: usize,
    pub subscribers: usize,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub pipeline: MetricsSnapshot,
    pub cache: CacheStats,
    /// Age of the oldest in-flight generation, if any
    pub oldest_in_flight_ms: Option<u64>,
    pub pois: usize,
    pub subscribers: usize,
}

/// GET /health
pub async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        pois: state.index.len(),
        subscribers: state.broadcaster.subscriber_count(),
    })
}

/// GET /api/metrics
pub async fn metrics(State(state): State<Arc<ApiState>>) -> Json<MetricsResponse> {
    let (_, oldest) = state.cache.in_flight();
    Json(MetricsResponse {
        pipeline: state.metrics.get_snapshot(state.active_window_seconds),
        cache: state.cache.stats(),
        oldest_in_flight_ms: oldest.map(|age| age.as_millis() as u64),
        pois: state.index.len(),
        subscribers: state.broadcaster.subscriber_count(),
    })
}
