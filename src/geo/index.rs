use super::{GeoPoint, PointOfInterest, METERS_PER_DEGREE};
use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Errors surfaced by a spatial index query.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("spatial index unavailable: {0}")]
    Unavailable(String),

    #[error("invalid query radius {0}")]
    InvalidRadius(f64),

    #[error("invalid query point ({latitude}, {longitude})")]
    InvalidPoint { latitude: f64, longitude: f64 },
}

/// A POI together with its distance from the query point.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PoiMatch {
    pub poi: PointOfInterest,
    pub distance_m: f64,
}

/// Radius query over the POI catalog.
///
/// Results are ordered by ascending distance, ties by ascending `poi_id`.
/// An empty vector means nothing lies within the radius.
#[async_trait]
pub trait SpatialIndex: Send + Sync {
    async fn query(&self, point: GeoPoint, radius_m: f64) -> Result<Vec<PoiMatch>, IndexError>;
}

/// Nearest match, ties resolved to the lowest `poi_id`.
///
/// Does not rely on the index having sorted its output.
pub fn select_nearest(matches: Vec<PoiMatch>) -> Option<PoiMatch> {
    matches.into_iter().min_by(compare_matches)
}

fn compare_matches(a: &PoiMatch, b: &PoiMatch) -> Ordering {
    a.distance_m
        .total_cmp(&b.distance_m)
        .then_with(|| a.poi.poi_id.cmp(&b.poi.poi_id))
}

fn check_query(point: &GeoPoint, radius_m: f64) -> Result<(), IndexError> {
    if !radius_m.is_finite() || radius_m < 0.0 {
        return Err(IndexError::InvalidRadius(radius_m));
    }
    if !point.is_valid() {
        return Err(IndexError::InvalidPoint {
            latitude: point.latitude,
            longitude: point.longitude,
        });
    }
    Ok(())
}

type CellKey = (i64, i64);

/// Uniform lat/lon grid over an immutable POI set.
///
/// Cells are square in degrees (`cell_size_m` of latitude); a query scans the
/// cells covering the radius bounding box and filters by haversine distance.
pub struct GridIndex {
    cell_deg: f64,
    pois: Vec<PointOfInterest>,
    cells: HashMap<CellKey, Vec<usize>>,
}

impl GridIndex {
    pub fn build(pois: Vec<PointOfInterest>, cell_size_m: f64) -> Self {
        let cell_size_m = if cell_size_m.is_finite() && cell_size_m > 0.0 {
            cell_size_m
        } else {
            250.0
        };
        let cell_deg = cell_size_m / METERS_PER_DEGREE;

        let mut cells: HashMap<CellKey, Vec<usize>> = HashMap::new();
        for (idx, poi) in pois.iter().enumerate() {
            cells
                .entry(cell_key(&poi.location, cell_deg))
                .or_default()
                .push(idx);
        }

        Self {
            cell_deg,
            pois,
            cells,
        }
    }

    pub fn len(&self) -> usize {
        self.pois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pois.is_empty()
    }

    pub fn get(&self, poi_id: u64) -> Option<&PointOfInterest> {
        self.pois.iter().find(|p| p.poi_id == poi_id)
    }

    /// Synchronous radius query (see [`SpatialIndex`] for ordering).
    pub fn within(&self, point: GeoPoint, radius_m: f64) -> Vec<PoiMatch> {
        let dlat = radius_m / METERS_PER_DEGREE;
        let cos_lat = point.latitude.to_radians().cos().abs().max(1e-6);
        let dlon = radius_m / (METERS_PER_DEGREE * cos_lat);

        let mut matches = Vec::new();
        let mut consider = |idx: usize| {
            let poi = &self.pois[idx];
            let distance_m = point.haversine_m(&poi.location);
            if distance_m <= radius_m {
                matches.push(PoiMatch {
                    poi: poi.clone(),
                    distance_m,
                });
            }
        };

        let wraps = point.longitude - dlon < -180.0 || point.longitude + dlon > 180.0;
        let (lat_lo, lon_lo) = cell_key(&GeoPoint::new(point.latitude - dlat, point.longitude - dlon), self.cell_deg);
        let (lat_hi, lon_hi) = cell_key(&GeoPoint::new(point.latitude + dlat, point.longitude + dlon), self.cell_deg);
        let box_cells = (lat_hi - lat_lo + 1).saturating_mul(lon_hi - lon_lo + 1);

        if wraps || box_cells as usize > self.cells.len() {
            // Bounding box larger than the occupied grid: a linear scan is cheaper.
            (0..self.pois.len()).for_each(&mut consider);
        } else {
            for lat_cell in lat_lo..=lat_hi {
                for lon_cell in lon_lo..=lon_hi {
                    if let Some(indices) = self.cells.get(&(lat_cell, lon_cell)) {
                        indices.iter().copied().for_each(&mut consider);
                    }
                }
            }
        }

        matches.sort_by(compare_matches);
        matches
    }
}

fn cell_key(point: &GeoPoint, cell_deg: f64) -> CellKey {
    (
        (point.latitude / cell_deg).floor() as i64,
        (point.longitude / cell_deg).floor() as i64,
    )
}

#[async_trait]
impl SpatialIndex for GridIndex {
    async fn query(&self, point: GeoPoint, radius_m: f64) -> Result<Vec<PoiMatch>, IndexError> {
        check_query(&point, radius_m)?;
        Ok(self.within(point, radius_m))
    }
}

/// Read-mostly index shared by all partition workers.
///
/// Refreshes build a new [`GridIndex`] off to the side and swap the pointer;
/// in-flight queries keep the snapshot they started with.
pub struct SharedIndex {
    current: RwLock<Arc<GridIndex>>,
    cell_size_m: f64,
}

impl SharedIndex {
    pub fn new(pois: Vec<PointOfInterest>, cell_size_m: f64) -> Self {
        Self {
            current: RwLock::new(Arc::new(GridIndex::build(pois, cell_size_m))),
            cell_size_m,
        }
    }

    pub fn empty(cell_size_m: f64) -> Self {
        Self::new(Vec::new(), cell_size_m)
    }

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> Arc<GridIndex> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Rebuild from a fresh catalog load. Returns the new POI count.
    pub fn replace(&self, pois: Vec<PointOfInterest>) -> usize {
        let rebuilt = Arc::new(GridIndex::build(pois, self.cell_size_m));
        let count = rebuilt.len();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = rebuilt;
        count
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

#[async_trait]
impl SpatialIndex for SharedIndex {
    async fn query(&self, point: GeoPoint, radius_m: f64) -> Result<Vec<PoiMatch>, IndexError> {
        check_query(&point, radius_m)?;
        Ok(self.snapshot().within(point, radius_m))
    }
}
