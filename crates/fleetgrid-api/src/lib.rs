//! fleetgrid-api: in-process operations for administrators and workers.
//!
//! | Operation | Description |
//! |---|---|
//! | `create_pool` / `update_pool` | Define a pool; provider must be registered |
//! | `delete_pool` | Switch to `null-provider`; expiry removes it later |
//! | `pool` / `list_pools` / `pool_stats` | Read pools |
//! | `list_launch_configs` | Active (optionally archived) launch configs |
//! | `list_workers` / `worker` | Read workers, filtered by state, launch config, quarantine |
//! | `should_worker_terminate` | The scanner's latest verdict |
//! | `register_worker` | REQUESTED → RUNNING, extends expiry |
//! | `quarantine_worker` | Set or lift a quarantine |
//! | `worker_stopping` / `worker_stopped` | Voluntary shutdown |
//! | `report_error` / `list_errors` | Pool error reports |

pub mod error;
pub mod fleet;

pub use error::{ApiError, ApiResult};
pub use fleet::{FleetApi, ListOptions, MAX_PAGE_SIZE, PoolDefinition, TerminationAdvice};
