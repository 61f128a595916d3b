//! fleetgrid-scanner: decides which workers should shut down.
//!
//! # Architecture
//!
//! ```text
//! FleetScanner::scan_all (deadline-bound)
//!   └── per pool (timeout-bound)
//!       ├── target_capacity(queue counts, pool config)
//!       ├── Provider::check_worker for each live worker
//!       ├── verdict::evaluate → archived | zombie | over capacity | needed
//!       └── StateStore::update_worker → provider_state.verdict
//! ```
//!
//! Verdicts are advisory: workers read them through the API and shut
//! themselves down. Every scan recomputes them from scratch.

pub mod scanner;
pub mod verdict;

pub use scanner::{FleetScanner, PoolScan, ScanReport, ScannerConfig, WorkerVerdict};
pub use verdict::{RuleContext, evaluate, launch_config_archived, zombie_reason};
