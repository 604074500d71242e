use async_trait::async_trait;
use nearyou::geo::GeoPoint;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("routing request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("routing engine returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("no route: {0}")]
    NoRoute(String),

    #[error("malformed routing response: {0}")]
    Malformed(String),
}

/// Source of road-following paths between two points.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Ordered waypoints from `start` to `end`, at least one point.
    async fn route(&self, start: GeoPoint, end: GeoPoint) -> Result<Vec<GeoPoint>, RouteError>;

    fn name(&self) -> &str;
}

/// OSRM HTTP client (`/route/v1/{profile}/...` with GeoJSON geometry).
pub struct OsrmClient {
    client: Client,
    base_url: String,
    profile: String,
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    /// `[longitude, latitude]` pairs
    coordinates: Vec<[f64; 2]>,
}

impl OsrmClient {
    pub fn new(base_url: impl Into<String>, profile: impl Into<String>, timeout: Duration) -> Result<Self, RouteError> {
        let client = Client::builder()
            .user_agent("NearYou-Producer/0.1")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: profile.into(),
        })
    }

    fn route_url(&self, start: GeoPoint, end: GeoPoint) -> String {
        format!(
            "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}?overview=full&geometries=geojson",
            self.base_url, self.profile, start.longitude, start.latitude, end.longitude, end.latitude
        )
    }
}

#[async_trait]
impl RouteProvider for OsrmClient {
    async fn route(&self, start: GeoPoint, end: GeoPoint) -> Result<Vec<GeoPoint>, RouteError> {
        let url = self.route_url(start, end);
        debug!(url = %url, "Requesting route");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RouteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: OsrmResponse = response
            .json()
            .await
            .map_err(|e| RouteError::Malformed(e.to_string()))?;
        if body.code != "Ok" {
            return Err(RouteError::NoRoute(body.message.unwrap_or(body.code)));
        }

        let route = body
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| RouteError::NoRoute("empty routes".to_string()))?;
        let points: Vec<GeoPoint> = route
            .geometry
            .coordinates
            .into_iter()
            .map(|[lon, lat]| GeoPoint::new(lat, lon))
            .collect();

        if points.is_empty() {
            return Err(RouteError::Malformed("route geometry has no coordinates".to_string()));
        }
        Ok(points)
    }

    fn name(&self) -> &str {
        "osrm"
    }
}

/// Straight segment from start to end, for runs without a routing engine.
#[derive(Debug, Default, Clone)]
pub struct StraightLineRouter;

#[async_trait]
impl RouteProvider for StraightLineRouter {
    async fn route(&self, start: GeoPoint, end: GeoPoint) -> Result<Vec<GeoPoint>, RouteError> {
        Ok(vec![start, end])
    }

    fn name(&self) -> &str {
        "straight_line"
    }
}
