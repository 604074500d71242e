use nearyou::geo::GeoPoint;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TrajectoryError {
    #[error("route has no points")]
    EmptyRoute,

    #[error("speed must be positive, got {0} m/s")]
    InvalidSpeed(f64),

    #[error("tick interval must be positive")]
    InvalidTick,
}

/// Number of samples for a path of `length_m` walked `step_m` per tick.
/// A zero-length path still yields one sample.
pub fn sample_count(length_m: f64, step_m: f64) -> usize {
    if length_m <= 0.0 {
        return 1;
    }
    (length_m / step_m).ceil().max(1.0) as usize
}

/// A planned path and a cursor along it.
///
/// Sample `k` (1-based) sits `k * step` metres along the polyline; the last
/// sample is the destination itself.
#[derive(Debug, Clone)]
pub struct Trajectory {
    waypoints: Vec<GeoPoint>,
    /// Distance from the start to each waypoint
    cumulative_m: Vec<f64>,
    step_m: f64,
    total_samples: usize,
    emitted: usize,
}

impl Trajectory {
    pub fn plan(waypoints: Vec<GeoPoint>, speed_mps: f64, tick: Duration) -> Result<Self, TrajectoryError> {
        if waypoints.is_empty() {
            return Err(TrajectoryError::EmptyRoute);
        }
        if !(speed_mps.is_finite() && speed_mps > 0.0) {
            return Err(TrajectoryError::InvalidSpeed(speed_mps));
        }
        if tick.is_zero() {
            return Err(TrajectoryError::InvalidTick);
        }

        let mut cumulative_m = Vec::with_capacity(waypoints.len());
        let mut total = 0.0;
        cumulative_m.push(0.0);
        for pair in waypoints.windows(2) {
            total += pair[0].haversine_m(&pair[1]);
            cumulative_m.push(total);
        }

        let step_m = speed_mps * tick.as_secs_f64();
        Ok(Self {
            total_samples: sample_count(total, step_m),
            waypoints,
            cumulative_m,
            step_m,
            emitted: 0,
        })
    }

    pub fn length_m(&self) -> f64 {
        self.cumulative_m.last().copied().unwrap_or(0.0)
    }

    pub fn origin(&self) -> GeoPoint {
        self.waypoints[0]
    }

    pub fn destination(&self) -> GeoPoint {
        self.waypoints[self.waypoints.len() - 1]
    }

    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    pub fn remaining(&self) -> usize {
        self.total_samples - self.emitted
    }

    pub fn is_exhausted(&self) -> bool {
        self.emitted >= self.total_samples
    }

    /// Advance one tick. `None` once the destination was emitted.
    pub fn next_sample(&mut self) -> Option<GeoPoint> {
        if self.is_exhausted() {
            return None;
        }
        self.emitted += 1;
        if self.emitted == self.total_samples {
            return Some(self.destination());
        }
        Some(self.position_at(self.emitted as f64 * self.step_m))
    }

    /// Point `distance_m` along the polyline, clamped to its ends.
    pub fn position_at(&self, distance_m: f64) -> GeoPoint {
        if distance_m <= 0.0 {
            return self.origin();
        }
        if distance_m >= self.length_m() {
            return self.destination();
        }

        // First waypoint at or beyond the distance; segment is (i - 1, i)
        let i = self.cumulative_m.partition_point(|&d| d < distance_m).max(1);
        let start = self.cumulative_m[i - 1];
        let segment = self.cumulative_m[i] - start;
        if segment <= 0.0 {
            return self.waypoints[i];
        }
        self.waypoints[i - 1].interpolate(&self.waypoints[i], (distance_m - start) / segment)
    }
}
