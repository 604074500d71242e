//! NearYou trajectory producer.
//!
//! Simulates entities moving through a city: each entity picks a random
//! destination, asks a [`RouteProvider`] for a path and publishes one
//! position event per tick while walking it.
//!
//! ```text
//! random destination → RouteProvider → Trajectory → PositionPublisher → bus
//! ```

pub mod routing;
pub mod simulator;
pub mod trajectory;

pub use routing::{OsrmClient, RouteError, RouteProvider, StraightLineRouter};
pub use simulator::{random_point, spawn_fleet, EntitySimulator, SimulatorSettings};
pub use trajectory::{sample_count, Trajectory, TrajectoryError};
