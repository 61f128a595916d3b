//! fleetgrid-metrics: observability for the capacity loops.
//!
//! The estimator, selector, scanner and provisioner emit [`MonitorEvent`]s
//! into a [`MonitorSink`]. The daemon fans them out to the tracing log and
//! to a [`MetricsRegistry`] that backs Prometheus-compatible exposition.
//!
//! # Architecture
//!
//! ```text
//! control loops
//!   └── MonitorSink::record(MonitorEvent)
//!         ├── TracingMonitor   → structured log lines
//!         ├── MetricsRegistry  → gauges and counters
//!         │     └── render_prometheus() → text/plain exposition
//!         └── RecordingMonitor → captured events (tests)
//! ```

pub mod monitor;
pub mod prometheus;
pub mod registry;

pub use monitor::{Fanout, MonitorEvent, MonitorSink, RecordingMonitor, TracingMonitor};
pub use prometheus::render_prometheus;
pub use registry::{MetricsRegistry, MetricsSnapshot, PoolGauges};
