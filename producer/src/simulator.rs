use crate::routing::RouteProvider;
use crate::trajectory::{Trajectory, TrajectoryError};
use chrono::Utc;
use nearyou::config::{ArrivalPolicy, BoundsConfig, SimulationConfig};
use nearyou::event::PositionEvent;
use nearyou::geo::GeoPoint;
use nearyou::nats::PositionPublisher;
use nearyou::retry::Backoff;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    pub speed_mps: f64,
    pub tick_interval: Duration,
    pub bounds: BoundsConfig,
    pub route_backoff: Backoff,
    /// Pause before retrying a cycle whose routing gave up
    pub retry_cycle: Duration,
    pub on_arrival: ArrivalPolicy,
}

impl SimulatorSettings {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            speed_mps: config.speed_mps,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            bounds: config.bounds,
            route_backoff: config.route_backoff(),
            retry_cycle: Duration::from_secs(config.retry_cycle_secs),
            on_arrival: config.on_arrival,
        }
    }

    pub fn validate(&self) -> Result<(), TrajectoryError> {
        if !(self.speed_mps.is_finite() && self.speed_mps > 0.0) {
            return Err(TrajectoryError::InvalidSpeed(self.speed_mps));
        }
        if self.tick_interval.is_zero() {
            return Err(TrajectoryError::InvalidTick);
        }
        Ok(())
    }
}

/// Uniform point inside the bounding box.
pub fn random_point<R: Rng>(bounds: &BoundsConfig, rng: &mut R) -> GeoPoint {
    GeoPoint::new(
        rng.gen_range(bounds.min_lat..=bounds.max_lat),
        rng.gen_range(bounds.min_lon..=bounds.max_lon),
    )
}

/// One simulated entity moving from destination to destination.
pub struct EntitySimulator {
    entity_id: String,
    position: GeoPoint,
    next_sequence: u64,
    settings: SimulatorSettings,
    router: Arc<dyn RouteProvider>,
    publisher: Arc<dyn PositionPublisher>,
    rng: StdRng,
}

impl EntitySimulator {
    pub fn new(
        entity_id: impl Into<String>,
        start: GeoPoint,
        settings: SimulatorSettings,
        router: Arc<dyn RouteProvider>,
        publisher: Arc<dyn PositionPublisher>,
        rng: StdRng,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            position: start,
            // Restarts never reuse sequence numbers of an earlier run
            next_sequence: Utc::now().timestamp_millis().max(0) as u64,
            settings,
            router,
            publisher,
            rng,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn position(&self) -> GeoPoint {
        self.position
    }

    /// Walk trajectories until shutdown (or arrival with `terminate`).
    /// Returns the number of events published.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut published = 0u64;
        info!(entity_id = %self.entity_id, router = self.router.name(), "Entity simulation started");

        'cycles: loop {
            if *shutdown.borrow() {
                break;
            }

            let mut trajectory = match self.plan_trajectory(&mut shutdown).await {
                Some(trajectory) => trajectory,
                None if *shutdown.borrow() => break,
                None => {
                    warn!(
                        entity_id = %self.entity_id,
                        retry_in_secs = self.settings.retry_cycle.as_secs(),
                        "Routing retries exhausted, skipping cycle"
                    );
                    tokio::select! {
                        _ = sleep(self.settings.retry_cycle) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                }
            };

            debug!(
                entity_id = %self.entity_id,
                length_m = trajectory.length_m(),
                samples = trajectory.total_samples(),
                "New trajectory"
            );

            let mut ticker = interval(self.settings.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            while let Some(point) = trajectory.next_sample() {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break 'cycles;
                        }
                    }
                }

                let event = PositionEvent::new(
                    self.entity_id.clone(),
                    self.next_sequence,
                    Utc::now().timestamp_millis(),
                    point,
                );
                self.next_sequence += 1;
                self.position = point;

                match self.publisher.publish(&event).await {
                    Ok(()) => published += 1,
                    Err(e) => warn!(
                        entity_id = %self.entity_id,
                        sequence_no = event.sequence_no,
                        error = %e,
                        "Failed to publish position"
                    ),
                }
            }

            if self.settings.on_arrival == ArrivalPolicy::Terminate {
                info!(entity_id = %self.entity_id, "Destination reached, terminating");
                break;
            }
        }

        info!(entity_id = %self.entity_id, published, "Entity simulation stopped");
        published
    }

    /// Route from the current position to a fresh random destination,
    /// retrying with backoff. `None` once the attempts are exhausted or
    /// shutdown is signalled during a backoff.
    async fn plan_trajectory(&mut self, shutdown: &mut watch::Receiver<bool>) -> Option<Trajectory> {
        let destination = random_point(&self.settings.bounds, &mut self.rng);
        let backoff = self.settings.route_backoff;

        for attempt in 0..backoff.max_attempts {
            match self.router.route(self.position, destination).await {
                Ok(waypoints) => {
                    match Trajectory::plan(waypoints, self.settings.speed_mps, self.settings.tick_interval) {
                        Ok(trajectory) => return Some(trajectory),
                        Err(e) => warn!(
                            entity_id = %self.entity_id,
                            attempt = attempt + 1,
                            error = %e,
                            "Unusable route"
                        ),
                    }
                }
                Err(e) => warn!(
                    entity_id = %self.entity_id,
                    attempt = attempt + 1,
                    max_attempts = backoff.max_attempts,
                    error = %e,
                    "Route request failed"
                ),
            }

            if backoff.should_retry(attempt) {
                let delay = backoff.delay(attempt);
                debug!(
                    entity_id = %self.entity_id,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::select! {
                    _ = sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return None;
                        }
                    }
                }
            }
        }
        None
    }
}

/// Spawn `config.entities` simulators (`user_1`, `user_2`, ...), each in its
/// own task starting at a random point.
pub fn spawn_fleet(
    config: &SimulationConfig,
    router: Arc<dyn RouteProvider>,
    publisher: Arc<dyn PositionPublisher>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<u64>> {
    let settings = SimulatorSettings::from_config(config);
    let mut seed_rng = StdRng::from_entropy();

    (1..=config.entities)
        .map(|n| {
            let mut rng = StdRng::seed_from_u64(seed_rng.gen());
            let start = random_point(&settings.bounds, &mut rng);
            let simulator = EntitySimulator::new(
                format!("user_{}", n),
                start,
                settings.clone(),
                Arc::clone(&router),
                Arc::clone(&publisher),
                rng,
            );
            tokio::spawn(simulator.run(shutdown.clone()))
        })
        .collect()
}
