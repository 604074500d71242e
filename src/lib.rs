// HTTP and WebSocket APIs
pub mod api;

// Single-flight TTL message cache
pub mod cache;

// Configuration loading
pub mod config;

// Per-partition proximity matching
pub mod dataflow;

// Position and enriched event model
pub mod event;

// Notification text generation
pub mod generator;

// Geometry and the spatial index
pub mod geo;

// NATS client integration
pub mod nats;

// Capped exponential backoff
pub mod retry;

// Analytics persistence and live fan-out
pub mod sink;

// Subscription management
pub mod subscription;
