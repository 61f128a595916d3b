//! The `Record` abstraction the generic store operations work over.
//!
//! Every persisted entity lives in its own redb table as a [`StoredRow`]:
//! the entity's JSON next to the concurrency token (`etag`) that guards
//! updates. Reads hand the token back inside a [`Versioned`] wrapper.

use redb::TableDefinition;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{StateError, StateResult};
use crate::tables::{LAUNCH_CONFIGS, POOL_ERRORS, POOLS, WORKERS};
use crate::types::{LaunchConfig, Pool, PoolError, Worker};

/// A persisted entity.
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// Table holding rows of this entity.
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]>;
    /// Human-readable name used in errors and logs.
    const KIND: &'static str;

    /// Primary key. Must not change across updates.
    fn key(&self) -> String;

    /// Business fields compared when a create collides with an existing row.
    /// Timestamps and loop-owned fields are left out so replays are idempotent.
    fn identity(&self) -> Value;

    fn validate(&self) -> StateResult<()> {
        Ok(())
    }
}

/// On-disk layout of every row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredRow {
    pub etag: String,
    pub value: Value,
}

impl StoredRow {
    pub(crate) fn new(value: Value) -> Self {
        Self {
            etag: new_etag(),
            value,
        }
    }

    pub(crate) fn decode(bytes: &[u8]) -> StateResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| StateError::Deserialize(e.to_string()))
    }

    pub(crate) fn encode(&self) -> StateResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StateError::Serialize(e.to_string()))
    }

    pub(crate) fn into_versioned<T: Record>(self) -> StateResult<Versioned<T>> {
        let record =
            serde_json::from_value(self.value).map_err(|e| StateError::Deserialize(e.to_string()))?;
        Ok(Versioned {
            etag: self.etag,
            record,
        })
    }
}

pub(crate) fn new_etag() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A record together with the concurrency token it was read under.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub etag: String,
    pub record: T,
}

impl<T> Versioned<T> {
    pub fn into_inner(self) -> T {
        self.record
    }
}

impl<T> std::ops::Deref for Versioned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

// ── Pagination ────────────────────────────────────────────────────

/// Paging and scoping for [`StateStore::list`](crate::StateStore::list).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of items returned; unbounded when `None`.
    pub limit: Option<usize>,
    /// Opaque cursor from a previous [`Page`].
    pub continuation: Option<String>,
    /// Only keys starting with this prefix are visited.
    pub prefix: Option<String>,
}

impl PageRequest {
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, continuation: Option<String>) -> Self {
        self.continuation = continuation;
        self
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Pass back in [`PageRequest::continuation`] to read the next page.
    pub continuation: Option<String>,
}

pub(crate) fn encode_cursor(key: &str) -> String {
    hex::encode(key.as_bytes())
}

pub(crate) fn decode_cursor(cursor: &str) -> StateResult<String> {
    let bytes = hex::decode(cursor)
        .map_err(|_| StateError::Validation(format!("invalid continuation token {cursor:?}")))?;
    String::from_utf8(bytes)
        .map_err(|_| StateError::Validation(format!("invalid continuation token {cursor:?}")))
}

// ── Entity bindings ───────────────────────────────────────────────

impl Record for Pool {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = POOLS;
    const KIND: &'static str = "worker pool";

    fn key(&self) -> String {
        self.worker_pool_id.clone()
    }

    fn identity(&self) -> Value {
        json!({
            "worker_pool_id": self.worker_pool_id,
            "provider_id": self.provider_id,
            "description": self.description,
            "config": self.config,
            "owner": self.owner,
            "email_on_error": self.email_on_error,
        })
    }

    fn validate(&self) -> StateResult<()> {
        Pool::validate(self)
    }
}

impl Record for LaunchConfig {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = LAUNCH_CONFIGS;
    const KIND: &'static str = "launch config";

    fn key(&self) -> String {
        format!("{}/{}", self.worker_pool_id, self.launch_config_id)
    }

    fn identity(&self) -> Value {
        json!({
            "worker_pool_id": self.worker_pool_id,
            "launch_config_id": self.launch_config_id,
            "initial_weight": self.spec.initial_weight,
            "max_capacity": self.spec.max_capacity,
            "capacity_per_instance": self.spec.capacity_per_instance,
            "configuration": self.spec.configuration,
        })
    }

    fn validate(&self) -> StateResult<()> {
        self.spec.validate()
    }
}

impl Record for Worker {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = WORKERS;
    const KIND: &'static str = "worker";

    fn key(&self) -> String {
        worker_key(&self.worker_pool_id, &self.worker_group, &self.worker_id)
    }

    fn identity(&self) -> Value {
        json!({
            "worker_pool_id": self.worker_pool_id,
            "worker_group": self.worker_group,
            "worker_id": self.worker_id,
            "provider_id": self.provider_id,
            "capacity": self.capacity,
            "launch_config_id": self.launch_config_id,
        })
    }

    fn validate(&self) -> StateResult<()> {
        Worker::validate(self)
    }
}

impl Record for PoolError {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = POOL_ERRORS;
    const KIND: &'static str = "worker pool error";

    fn key(&self) -> String {
        format!("{}/{}", self.worker_pool_id, self.error_id)
    }

    fn identity(&self) -> Value {
        json!({
            "error_id": self.error_id,
            "worker_pool_id": self.worker_pool_id,
            "kind": self.kind,
            "title": self.title,
            "description": self.description,
            "extra": self.extra,
            "launch_config_id": self.launch_config_id,
        })
    }
}

/// Key of a worker row.
pub fn worker_key(worker_pool_id: &str, worker_group: &str, worker_id: &str) -> String {
    format!("{worker_pool_id}/{worker_group}/{worker_id}")
}

/// Prefix shared by every child row of a pool.
pub fn pool_prefix(worker_pool_id: &str) -> String {
    format!("{worker_pool_id}/")
}
