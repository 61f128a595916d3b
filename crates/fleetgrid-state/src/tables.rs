//! redb table definitions for the fleetgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (a JSON-serialized
//! [`StoredRow`](crate::record::StoredRow)). Child records are keyed under
//! their pool id so a `{worker_pool_id}/` prefix scan finds them.

use redb::TableDefinition;

/// Worker pools keyed by `{provisioner_id}/{worker_type}`.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("worker_pools");

/// Launch configs keyed by `{worker_pool_id}/{launch_config_id}`.
pub const LAUNCH_CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("launch_configs");

/// Workers keyed by `{worker_pool_id}/{worker_group}/{worker_id}`.
pub const WORKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("workers");

/// Pool errors keyed by `{worker_pool_id}/{error_id}`.
pub const POOL_ERRORS: TableDefinition<&str, &[u8]> = TableDefinition::new("worker_pool_errors");
