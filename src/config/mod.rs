mod env;

use crate::cache::CacheSettings;
use crate::dataflow::ProximityPolicy;
use crate::generator::ChatSettings;
use crate::retry::Backoff;
use crate::sink::SinkSettings;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub use crate::nats::NatsConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete NearYou configuration, shared by the dataflow and the producer
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NearYouConfig {
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub proximity: ProximityConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Proximity matching configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProximityConfig {
    /// Entry radius (meters)
    #[serde(default = "default_radius_m")]
    pub radius_m: f64,
    /// Exit radius for hysteresis (meters), >= radius_m
    #[serde(default = "default_exit_radius_m")]
    pub exit_radius_m: f64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_index_timeout_ms")]
    pub index_timeout_ms: u64,
    /// How long a worker waits on the bus before re-checking shutdown
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

fn default_radius_m() -> f64 {
    200.0
}

fn default_exit_radius_m() -> f64 {
    250.0
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_index_timeout_ms() -> u64 {
    500
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            radius_m: default_radius_m(),
            exit_radius_m: default_exit_radius_m(),
            cooldown_secs: default_cooldown_secs(),
            index_timeout_ms: default_index_timeout_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl ProximityConfig {
    pub fn policy(&self) -> ProximityPolicy {
        ProximityPolicy::new(
            self.radius_m,
            self.exit_radius_m,
            Duration::from_secs(self.cooldown_secs),
        )
    }
}

/// Spatial index configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// JSON array of points of interest
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
    #[serde(default = "default_cell_size_m")]
    pub cell_size_m: f64,
    /// 0 disables periodic reloads
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

fn default_catalog_path() -> String {
    "data/pois.json".to_string()
}

fn default_cell_size_m() -> f64 {
    250.0
}

fn default_refresh_interval_secs() -> u64 {
    300
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            cell_size_m: default_cell_size_m(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

/// Message cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
}

fn default_ttl_secs() -> u64 {
    86_400
}

fn default_max_entries() -> usize {
    10_000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_generation_timeout_ms() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval_secs(),
            generation_timeout_ms: default_generation_timeout_ms(),
        }
    }
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(self.ttl_secs),
            max_entries: self.max_entries,
            generation_timeout: Duration::from_millis(self.generation_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    /// OpenAI-compatible chat completions endpoint
    Chat,
    /// Offline template, no network
    Template,
}

/// Text generation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_kind")]
    pub kind: GeneratorKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Optional JSON object of entity id → profile
    #[serde(default)]
    pub profiles_path: Option<String>,
    /// Optional JSON array of shop offers
    #[serde(default)]
    pub offers_path: Option<String>,
}

fn default_generator_kind() -> GeneratorKind {
    GeneratorKind::Template
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: default_generator_kind(),
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            profiles_path: None,
            offers_path: None,
        }
    }
}

impl GeneratorConfig {
    /// HTTP settings; the request timeout follows the cache's generation timeout.
    pub fn chat_settings(&self, request_timeout: Duration) -> ChatSettings {
        ChatSettings {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            request_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    #[serde(rename = "clickhouse")]
    ClickHouse,
    Jsonl,
    None,
}

/// Analytics sink configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_kind")]
    pub kind: SinkKind,
    #[serde(default = "default_sink_url")]
    pub url: String,
    #[serde(default = "default_sink_table")]
    pub table: String,
    #[serde(default = "default_sink_path")]
    pub path: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_sink_kind() -> SinkKind {
    SinkKind::None
}

fn default_sink_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_sink_table() -> String {
    "user_events".to_string()
}

fn default_sink_path() -> String {
    "data/enriched_events.jsonl".to_string()
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    500
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    5000
}

fn default_write_timeout_ms() -> u64 {
    5000
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: default_sink_kind(),
            url: default_sink_url(),
            table: default_sink_table(),
            path: default_sink_path(),
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl SinkConfig {
    pub fn settings(&self) -> SinkSettings {
        SinkSettings {
            queue_capacity: self.queue_capacity,
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            backoff: Backoff::from_millis(self.backoff_base_ms, self.backoff_max_ms, self.max_attempts),
        }
    }
}

/// Live subscriber configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Per-subscriber queue; a subscriber that falls this far behind is dropped
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_subscriber_buffer() -> usize {
    256
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// How often to log a metrics snapshot (seconds)
    #[serde(default = "default_report_interval")]
    pub report_interval_seconds: u64,
    /// Time window for "active entity" tracking (seconds)
    #[serde(default = "default_active_entity_window")]
    pub active_entity_window_seconds: i64,
}

fn default_report_interval() -> u64 {
    30
}

fn default_active_entity_window() -> i64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_seconds: default_report_interval(),
            active_entity_window_seconds: default_active_entity_window(),
        }
    }
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

/// Rectangle new destinations are drawn from
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BoundsConfig {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Default for BoundsConfig {
    // Milan
    fn default() -> Self {
        Self {
            min_lat: 45.40,
            max_lat: 45.50,
            min_lon: 9.10,
            max_lon: 9.30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalPolicy {
    NewDestination,
    Terminate,
}

/// Trajectory producer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_entities")]
    pub entities: usize,
    #[serde(default = "default_speed_mps")]
    pub speed_mps: f64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub bounds: BoundsConfig,
    #[serde(default = "default_osrm_url")]
    pub osrm_url: String,
    #[serde(default = "default_osrm_profile")]
    pub osrm_profile: String,
    #[serde(default = "default_route_timeout_ms")]
    pub route_timeout_ms: u64,
    #[serde(default = "default_route_max_attempts")]
    pub route_max_attempts: u32,
    #[serde(default = "default_route_backoff_base_ms")]
    pub route_backoff_base_ms: u64,
    #[serde(default = "default_route_backoff_max_ms")]
    pub route_backoff_max_ms: u64,
    /// Pause after a cycle whose routing exhausted its retries
    #[serde(default = "default_retry_cycle_secs")]
    pub retry_cycle_secs: u64,
    #[serde(default = "default_on_arrival")]
    pub on_arrival: ArrivalPolicy,
}

fn default_entities() -> usize {
    5
}

fn default_speed_mps() -> f64 {
    4.2
}

fn default_tick_interval_ms() -> u64 {
    2000
}

fn default_osrm_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_osrm_profile() -> String {
    "cycling".to_string()
}

fn default_route_timeout_ms() -> u64 {
    5000
}

fn default_route_max_attempts() -> u32 {
    5
}

fn default_route_backoff_base_ms() -> u64 {
    500
}

fn default_route_backoff_max_ms() -> u64 {
    8000
}

fn default_retry_cycle_secs() -> u64 {
    30
}

fn default_on_arrival() -> ArrivalPolicy {
    ArrivalPolicy::NewDestination
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            entities: default_entities(),
            speed_mps: default_speed_mps(),
            tick_interval_ms: default_tick_interval_ms(),
            bounds: BoundsConfig::default(),
            osrm_url: default_osrm_url(),
            osrm_profile: default_osrm_profile(),
            route_timeout_ms: default_route_timeout_ms(),
            route_max_attempts: default_route_max_attempts(),
            route_backoff_base_ms: default_route_backoff_base_ms(),
            route_backoff_max_ms: default_route_backoff_max_ms(),
            retry_cycle_secs: default_retry_cycle_secs(),
            on_arrival: default_on_arrival(),
        }
    }
}

impl SimulationConfig {
    pub fn route_backoff(&self) -> Backoff {
        Backoff::from_millis(
            self.route_backoff_base_ms,
            self.route_backoff_max_ms,
            self.route_max_attempts,
        )
    }
}

impl NearYouConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.proximity;
        if !(p.radius_m.is_finite() && p.radius_m > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "proximity.radius_m must be positive, got {}",
                p.radius_m
            )));
        }
        if !p.exit_radius_m.is_finite() || p.exit_radius_m < p.radius_m {
            return Err(ConfigError::Invalid(format!(
                "proximity.exit_radius_m ({}) must be >= radius_m ({})",
                p.exit_radius_m, p.radius_m
            )));
        }
        if self.nats.partitions == 0 {
            return Err(ConfigError::Invalid("nats.partitions must be at least 1".to_string()));
        }
        if !(self.index.cell_size_m.is_finite() && self.index.cell_size_m > 0.0) {
            return Err(ConfigError::Invalid("index.cell_size_m must be positive".to_string()));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be at least 1".to_string()));
        }

        let s = &self.simulation;
        if !(s.speed_mps.is_finite() && s.speed_mps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "simulation.speed_mps must be positive, got {}",
                s.speed_mps
            )));
        }
        if s.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("simulation.tick_interval_ms must be positive".to_string()));
        }
        let b = &s.bounds;
        if b.min_lat >= b.max_lat || b.min_lon >= b.max_lon {
            return Err(ConfigError::Invalid("simulation.bounds are empty".to_string()));
        }
        if self.generator.kind == GeneratorKind::Chat && self.generator.base_url.is_empty() {
            return Err(ConfigError::Invalid("generator.base_url is required for kind = \"chat\"".to_string()));
        }
        Ok(())
    }
}
