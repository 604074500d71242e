//! Per-partition proximity matching.
//!
//! Each bus partition is consumed by one [`PartitionWorker`] that owns the
//! proximity state for every entity hashed to it. Workers share the spatial
//! index, the message cache and the downstream handles.

mod composer;
mod metrics;
mod metrics_reporter;
mod proximity;
mod runner;
mod worker;

pub use composer::MessageComposer;
pub use metrics::{MessageCounts, MetricsSnapshot, MetricsTracker};
pub use metrics_reporter::run_metrics_reporter;
pub use proximity::{EntityTrack, ProximityPolicy, ProximityRecord, ProximityState, ProximityTracker};
pub use runner::{dispatch, run_partition, run_stream};
pub use worker::{Downstream, Outcome, PartitionWorker};
