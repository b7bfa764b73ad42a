//! Load-generating echo client.
//!
//! A fleet of workers, one OS thread and one connection each. Workers share
//! nothing but the record sink.

pub mod fleet;
pub mod record;
pub mod summary;
pub mod worker;

pub use fleet::run_fleet;
pub use record::{LatencyRecorder, ResultRecord};
pub use summary::FleetSummary;
pub use worker::{run_worker, WorkerSpec};
