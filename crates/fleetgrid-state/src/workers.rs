//! Worker operations.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::StateResult;
use crate::record::{Page, PageRequest, Versioned, pool_prefix, worker_key};
use crate::store::StateStore;
use crate::types::*;

/// Filters accepted by [`StateStore::list_workers`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerFilter {
    pub state: Option<WorkerState>,
    pub launch_config_id: Option<String>,
    /// `Some(true)` keeps only quarantined workers, `Some(false)` only the others.
    pub quarantined: Option<bool>,
}

impl WorkerFilter {
    pub fn matches(&self, worker: &Worker, now: DateTime<Utc>) -> bool {
        self.state.is_none_or(|state| worker.state == state)
            && self
                .launch_config_id
                .as_deref()
                .is_none_or(|id| worker.launch_config_id.as_deref() == Some(id))
            && self
                .quarantined
                .is_none_or(|q| worker.is_quarantined(now) == q)
    }
}

impl StateStore {
    /// Record a worker; replaying the same request is a no-op.
    pub fn create_worker(&self, worker: Worker) -> StateResult<Versioned<Worker>> {
        self.create(worker)
    }

    pub fn worker(
        &self,
        worker_pool_id: &str,
        worker_group: &str,
        worker_id: &str,
    ) -> StateResult<Versioned<Worker>> {
        self.get(&worker_key(worker_pool_id, worker_group, worker_id))
    }

    pub fn update_worker<F>(
        &self,
        worker_pool_id: &str,
        worker_group: &str,
        worker_id: &str,
        modify: F,
    ) -> StateResult<Versioned<Worker>>
    where
        F: FnMut(&mut Worker) -> StateResult<()>,
    {
        self.update(&worker_key(worker_pool_id, worker_group, worker_id), modify)
    }

    /// Every worker of a pool, in key order.
    pub fn workers_for_pool(&self, worker_pool_id: &str) -> StateResult<Vec<Versioned<Worker>>> {
        self.list_all(&pool_prefix(worker_pool_id), |_| true)
    }

    /// One page of a pool's workers.
    pub fn list_workers(
        &self,
        worker_pool_id: &str,
        filter: &WorkerFilter,
        page: PageRequest,
        now: DateTime<Utc>,
    ) -> StateResult<Page<Versioned<Worker>>> {
        let page = PageRequest {
            prefix: Some(pool_prefix(worker_pool_id)),
            ..page
        };
        self.list(&page, |w: &Worker| filter.matches(w, now))
    }

    /// Non-stopped workers of a pool, oldest first.
    ///
    /// Ties on creation time are broken by worker group, then worker id, so
    /// every loop sees the same order.
    pub fn live_workers(&self, worker_pool_id: &str) -> StateResult<Vec<Versioned<Worker>>> {
        let mut workers =
            self.list_all(&pool_prefix(worker_pool_id), |w: &Worker| w.state.is_live())?;
        workers.sort_by(|a, b| {
            (a.created, &a.worker_group, &a.worker_id).cmp(&(
                b.created,
                &b.worker_group,
                &b.worker_id,
            ))
        });
        Ok(workers)
    }

    /// Total capacity of a pool's non-stopped workers.
    pub fn pool_capacity(&self, worker_pool_id: &str) -> StateResult<u64> {
        Ok(self
            .live_workers(worker_pool_id)?
            .iter()
            .map(|w| u64::from(w.capacity))
            .sum())
    }

    /// Delete workers whose `expires` is in the past. Returns how many went.
    pub fn expire_workers(&self, now: DateTime<Utc>) -> StateResult<u32> {
        let expired = self.list_all::<Worker, _>("", |w| w.expires < now)?;
        let mut count = 0;
        for worker in expired {
            let key = worker_key(&worker.worker_pool_id, &worker.worker_group, &worker.worker_id);
            if self.delete_versioned::<Worker>(&key, &worker.etag)? {
                count += 1;
            }
        }
        if count > 0 {
            debug!(count, "workers expired");
        }
        Ok(count)
    }
}
