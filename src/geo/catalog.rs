use super::{PointOfInterest, SharedIndex};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Source of the POI set the index is built from.
#[async_trait]
pub trait PoiCatalog: Send + Sync {
    async fn load(&self) -> Result<Vec<PointOfInterest>>;

    /// Human-readable origin, used in log lines.
    fn describe(&self) -> String;
}

/// Catalog backed by a JSON array file.
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PoiCatalog for FileCatalog {
    async fn load(&self) -> Result<Vec<PointOfInterest>> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read POI catalog {}", self.path.display()))?;

        let pois: Vec<PointOfInterest> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse POI catalog {}", self.path.display()))?;

        let total = pois.len();
        let valid: Vec<PointOfInterest> = pois
            .into_iter()
            .filter(|poi| {
                let ok = poi.location.is_valid();
                if !ok {
                    warn!(
                        poi_id = poi.poi_id,
                        latitude = poi.location.latitude,
                        longitude = poi.location.longitude,
                        "Skipping POI with invalid location"
                    );
                }
                ok
            })
            .collect();

        if valid.len() < total {
            warn!(skipped = total - valid.len(), "Some catalog entries were rejected");
        }

        Ok(valid)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Periodically reload the catalog into the shared index.
///
/// The first tick fires immediately and is consumed, since callers load the
/// catalog once at startup. A failed reload keeps the previous index.
pub async fn run_refresh_loop(
    index: Arc<SharedIndex>,
    catalog: Arc<dyn PoiCatalog>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    info!(
        catalog = %catalog.describe(),
        interval_secs = interval_secs,
        "POI catalog refresh loop started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match catalog.load().await {
                    Ok(pois) => {
                        let count = index.replace(pois);
                        info!(pois = count, "POI index refreshed");
                    }
                    Err(e) => {
                        error!(error = %e, "POI catalog reload failed, keeping previous index");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("POI catalog refresh loop stopped");
}
