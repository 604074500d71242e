// Geospatial primitives and the POI index (leaf of the pipeline)

mod catalog;
mod index;

pub use catalog::{run_refresh_loop, FileCatalog, PoiCatalog};
pub use index::{select_nearest, GridIndex, IndexError, PoiMatch, SharedIndex, SpatialIndex};

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Metres spanned by one degree of latitude.
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// WGS84 coordinate pair in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in metres (haversine).
    pub fn haversine_m(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
    }

    /// Linear interpolation between two points; `fraction` is clamped to [0, 1].
    ///
    /// Accurate enough for road segments (tens to hundreds of metres).
    pub fn interpolate(&self, other: &GeoPoint, fraction: f64) -> GeoPoint {
        let t = fraction.clamp(0.0, 1.0);
        GeoPoint {
            latitude: self.latitude + (other.latitude - self.latitude) * t,
            longitude: self.longitude + (other.longitude - self.longitude) * t,
        }
    }

    /// Point displaced by the given metres north and east (small offsets only).
    pub fn offset_m(&self, north_m: f64, east_m: f64) -> GeoPoint {
        let cos_lat = self.latitude.to_radians().cos().max(1e-9);
        GeoPoint {
            latitude: self.latitude + north_m / METERS_PER_DEGREE,
            longitude: self.longitude + east_m / (METERS_PER_DEGREE * cos_lat),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A shop or place entities are matched against. Read-only to the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub poi_id: u64,
    pub name: String,
    pub category: String,
    #[serde(flatten)]
    pub location: GeoPoint,
}
