//! fleetd internals, shared by the binary and its integration tests.

pub mod daemon;
pub mod telemetry;

pub use daemon::{DB_FILE, Fleet, METRICS_FILE, provider_registry, write_metrics_file};
