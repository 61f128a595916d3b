//! fleetgrid-state: embedded state store for fleetgrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for worker pools, launch configs, workers and pool errors.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns,
//! next to a concurrency token (`etag`). Composite keys
//! (`{worker_pool_id}/{worker_group}/{worker_id}`,
//! `{worker_pool_id}/{launch_config_id}`) enable prefix scans per pool.
//!
//! Several loops, possibly in several processes, write the same rows
//! without locks. [`StateStore::update`] reads a snapshot, runs a modifier
//! on a copy, and writes back only the changed fields under the snapshot's
//! etag, retrying on a stale token. See [`patch`] for the merge rule.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod patch;
pub mod pool_errors;
pub mod pools;
pub mod record;
pub mod stats;
pub mod store;
pub mod tables;
pub mod types;
pub mod workers;

pub use error::{ErrorKind, StateError, StateResult};
pub use pool_errors::DEFAULT_ERROR_RETENTION_DAYS;
pub use pools::PoolUpdate;
pub use record::{Page, PageRequest, Record, Versioned, pool_prefix, worker_key};
pub use stats::{CapacityBreakdown, PoolStats};
pub use store::{StateStore, StoreOptions};
pub use types::*;
pub use workers::WorkerFilter;
