// Integration tests for the HTTP surface (health, metrics, websocket route).

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use nearyou::api::{create_router, ApiState};
use nearyou::cache::{CacheKey, CacheSettings, MessageCache};
use nearyou::dataflow::MetricsTracker;
use nearyou::geo::{GeoPoint, PointOfInterest, SharedIndex};
use nearyou::sink::Broadcaster;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_app(metrics: MetricsTracker, cache: Arc<MessageCache>) -> Router {
    let index = SharedIndex::new(
        vec![PointOfInterest {
            poi_id: 1,
            name: "Bar Basso".to_string(),
            category: "bar".to_string(),
            location: GeoPoint::new(45.4786, 9.2198),
        }],
        250.0,
    );
    create_router(ApiState {
        metrics: metrics.clone(),
        cache,
        broadcaster: Arc::new(Broadcaster::new(8, metrics)),
        index: Arc::new(index),
        active_window_seconds: 60,
    })
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health() {
    let app = create_test_app(MetricsTracker::new(), Arc::new(MessageCache::new(CacheSettings::default())));

    let (status, json) = get_json(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["pois"], 1);
    assert_eq!(json["subscribers"], 0);
}

#[tokio::test]
async fn test_metrics_snapshot() {
    let metrics = MetricsTracker::new();
    let cache = Arc::new(MessageCache::new(CacheSettings::default()));

    metrics.record_event("user_1");
    metrics.record_event("user_2");
    metrics.record_duplicate();
    metrics.record_match();
    cache
        .get_or_generate(
            &CacheKey::new("user_1", 1, "ctx"),
            || "fallback".to_string(),
            || async { Ok::<_, std::io::Error>("Negroni sbagliato at Bar Basso".to_string()) },
        )
        .await;

    let app = create_test_app(metrics, cache);
    let (status, json) = get_json(app, "/api/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["pipeline"]["events_processed"], 2);
    assert_eq!(json["pipeline"]["duplicates_discarded"], 1);
    assert_eq!(json["pipeline"]["poi_matches"], 1);
    assert_eq!(json["pipeline"]["active_entities"], 2);
    assert_eq!(json["cache"]["misses"], 1);
    assert_eq!(json["cache"]["size"], 1);
    assert!(json["oldest_in_flight_ms"].is_null());
}

#[tokio::test]
async fn test_cors_headers() {
    let app = create_test_app(MetricsTracker::new(), Arc::new(MessageCache::new(CacheSettings::default())));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "http://dashboard.local")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_ws_requires_upgrade() {
    let app = create_test_app(MetricsTracker::new(), Arc::new(MessageCache::new(CacheSettings::default())));

    let response = app
        .oneshot(Request::builder().uri("/api/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_unknown_route() {
    let app = create_test_app(MetricsTracker::new(), Arc::new(MessageCache::new(CacheSettings::default())));

    let response = app
        .oneshot(Request::builder().uri("/api/events").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
