//! StateStore: redb-backed state persistence for fleetgrid.
//!
//! Provides generic, optimistic-concurrency operations over any
//! [`Record`]: `get`, `create`, `update`, `list` and `delete`. The
//! entity-specific operations live next to their types (`pools`,
//! `workers`, `pool_errors`, `stats`) and are built on these.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::patch::{diff, merge_defined};
use crate::record::{
    Page, PageRequest, Record, StoredRow, Versioned, decode_cursor, encode_cursor, new_etag,
};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type RowTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Tuning for the optimistic update loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Attempts before an update gives up with `Congestion`.
    pub max_update_attempts: u32,
    /// Pause between attempts after a stale token. The calling thread
    /// sleeps, so keep it short when updates run on an async runtime.
    pub retry_delay: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_update_attempts: 10,
            retry_delay: Duration::from_millis(25),
        }
    }
}

enum PatchOutcome {
    Written(StoredRow),
    Stale,
    Missing,
}

/// Thread-safe state store backed by redb.
///
/// Every call is synchronous: redb transactions block, and a contended
/// [`update`](Self::update) sleeps `retry_delay` between attempts. Async
/// control loops call it directly and accept at most
/// `(max_update_attempts - 1) * retry_delay` of blocking per update;
/// anything needing a tighter bound should go through
/// `tokio::task::spawn_blocking`.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    options: StoreOptions,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    pub fn open_with(path: &Path, options: StoreOptions) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            options,
        };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        Self::open_in_memory_with(StoreOptions::default())
    }

    pub fn open_in_memory_with(options: StoreOptions) -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            options,
        };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POOLS).map_err(map_err!(Table))?;
        txn.open_table(LAUNCH_CONFIGS).map_err(map_err!(Table))?;
        txn.open_table(WORKERS).map_err(map_err!(Table))?;
        txn.open_table(POOL_ERRORS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────────

    fn read_row(&self, table: RowTable, key: &str) -> StateResult<Option<StoredRow>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(StoredRow::decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Fetch a record, or `None` if absent.
    pub fn find<T: Record>(&self, key: &str) -> StateResult<Option<Versioned<T>>> {
        self.read_row(T::TABLE, key)?
            .map(StoredRow::into_versioned)
            .transpose()
    }

    /// Fetch a record, failing with `NotFound` if absent.
    pub fn get<T: Record>(&self, key: &str) -> StateResult<Versioned<T>> {
        self.find(key)?
            .ok_or_else(|| StateError::not_found(T::KIND, key))
    }

    /// List records in key order.
    ///
    /// Only rows under `page.prefix` are visited, and `filter` decides which
    /// of them are returned. When the limit is hit while more rows remain
    /// the returned page carries a continuation cursor.
    pub fn list<T, F>(&self, page: &PageRequest, filter: F) -> StateResult<Page<Versioned<T>>>
    where
        T: Record,
        F: Fn(&T) -> bool,
    {
        let prefix = page.prefix.as_deref().unwrap_or("");
        let cursor = page.continuation.as_deref().map(decode_cursor).transpose()?;
        let start = match cursor.as_deref() {
            Some(after) => Bound::Excluded(after),
            None => Bound::Included(prefix),
        };

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
        let mut items = Vec::new();
        let mut last_key: Option<String> = None;
        let mut continuation = None;
        for entry in table
            .range::<&str>((start, Bound::Unbounded))
            .map_err(map_err!(Read))?
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            if page.limit.is_some_and(|limit| items.len() >= limit) {
                continuation = last_key.as_deref().map(encode_cursor);
                break;
            }
            let versioned: Versioned<T> = StoredRow::decode(value.value())?.into_versioned()?;
            last_key = Some(key.to_string());
            if filter(&versioned.record) {
                items.push(versioned);
            }
        }
        Ok(Page {
            items,
            continuation,
        })
    }

    /// Every record under `prefix` that passes `filter`.
    pub fn list_all<T, F>(&self, prefix: &str, filter: F) -> StateResult<Vec<Versioned<T>>>
    where
        T: Record,
        F: Fn(&T) -> bool,
    {
        Ok(self.list(&PageRequest::prefixed(prefix), filter)?.items)
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Insert a new record.
    ///
    /// Replaying a create whose identity matches the stored row succeeds
    /// and returns the stored row untouched; any other collision is a
    /// `Conflict`.
    pub fn create<T: Record>(&self, record: T) -> StateResult<Versioned<T>> {
        record.validate()?;
        let key = record.key();
        let value = serde_json::to_value(&record).map_err(map_err!(Serialize))?;
        let row = StoredRow::new(value);
        let bytes = row.encode()?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existing = {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            let existing = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(StoredRow::decode(guard.value())?),
                None => None,
            };
            if existing.is_none() {
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
            existing
        };

        match existing {
            None => {
                txn.commit().map_err(map_err!(Transaction))?;
                debug!(kind = T::KIND, %key, "record created");
                Ok(Versioned {
                    etag: row.etag,
                    record,
                })
            }
            Some(stored) => {
                txn.abort().map_err(map_err!(Transaction))?;
                let stored: Versioned<T> = stored.into_versioned()?;
                if stored.record.identity() == record.identity() {
                    debug!(kind = T::KIND, %key, "idempotent create replayed");
                    Ok(stored)
                } else {
                    Err(StateError::conflict(
                        T::KIND,
                        key,
                        "a different record already exists under this key",
                    ))
                }
            }
        }
    }

    /// Read-modify-write a record under optimistic concurrency.
    ///
    /// The modifier runs against a fresh copy of the current row. Only the
    /// fields it changed are written, guarded by the row's etag. A stale
    /// etag reloads the row and runs the modifier again, up to
    /// `max_update_attempts` times. A modifier error aborts the update
    /// with nothing written.
    pub fn update<T, F>(&self, key: &str, mut modify: F) -> StateResult<Versioned<T>>
    where
        T: Record,
        F: FnMut(&mut T) -> StateResult<()>,
    {
        let max_attempts = self.options.max_update_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let snapshot = self
                .read_row(T::TABLE, key)?
                .ok_or_else(|| StateError::not_found(T::KIND, key))?;
            let mut record: T = serde_json::from_value(snapshot.value.clone())
                .map_err(map_err!(Deserialize))?;
            modify(&mut record)?;
            if record.key() != key {
                return Err(StateError::Validation(format!(
                    "{} key fields are immutable ({key})",
                    T::KIND
                )));
            }
            record.validate()?;

            let after = serde_json::to_value(&record).map_err(map_err!(Serialize))?;
            let Some(patch) = diff(&snapshot.value, &after) else {
                return Ok(Versioned {
                    etag: snapshot.etag,
                    record,
                });
            };

            match self.write_patch(T::TABLE, key, &snapshot.etag, &patch)? {
                PatchOutcome::Written(row) => {
                    debug!(kind = T::KIND, %key, attempt, "record updated");
                    return row.into_versioned();
                }
                PatchOutcome::Missing => return Err(StateError::not_found(T::KIND, key)),
                PatchOutcome::Stale if attempt >= max_attempts => {
                    warn!(kind = T::KIND, %key, attempt, "update gave up on a contended row");
                    return Err(StateError::Congestion {
                        kind: T::KIND,
                        key: key.to_string(),
                        attempts: attempt,
                    });
                }
                PatchOutcome::Stale => {
                    debug!(kind = T::KIND, %key, attempt, "stale etag, retrying update");
                    if !self.options.retry_delay.is_zero() {
                        std::thread::sleep(self.options.retry_delay);
                    }
                }
            }
        }
    }

    fn write_patch(
        &self,
        table: RowTable,
        key: &str,
        expected_etag: &str,
        patch: &Value,
    ) -> StateResult<PatchOutcome> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            let current = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => Some(StoredRow::decode(guard.value())?),
                None => None,
            };
            match current {
                None => PatchOutcome::Missing,
                Some(row) if row.etag != expected_etag => PatchOutcome::Stale,
                Some(mut row) => {
                    merge_defined(&mut row.value, patch);
                    row.etag = new_etag();
                    let bytes = row.encode()?;
                    table
                        .insert(key, bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    PatchOutcome::Written(row)
                }
            }
        };
        match &outcome {
            PatchOutcome::Written(_) => txn.commit().map_err(map_err!(Transaction))?,
            _ => txn.abort().map_err(map_err!(Transaction))?,
        }
        Ok(outcome)
    }

    /// Delete a record by key. Returns true if it existed.
    pub fn delete<T: Record>(&self, key: &str) -> StateResult<bool> {
        self.delete_row(T::TABLE, key, None)
    }

    /// Delete a record only if it still carries `etag`.
    ///
    /// Returns false when the row is gone or was modified since it was read.
    pub fn delete_versioned<T: Record>(&self, key: &str, etag: &str) -> StateResult<bool> {
        self.delete_row(T::TABLE, key, Some(etag))
    }

    fn delete_row(&self, table: RowTable, key: &str, etag: Option<&str>) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            let matches = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => match etag {
                    Some(etag) => StoredRow::decode(guard.value())?.etag == etag,
                    None => true,
                },
                None => false,
            };
            existed = matches && table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "record deleted");
        Ok(existed)
    }
}
