//! Pool error reports.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::StateResult;
use crate::record::{Page, PageRequest, Versioned, pool_prefix};
use crate::store::StateStore;
use crate::types::*;

/// How long error reports are kept by default.
pub const DEFAULT_ERROR_RETENTION_DAYS: i64 = 7;

impl StateStore {
    /// Append an error report against a pool.
    pub fn report_error(
        &self,
        worker_pool_id: &str,
        error: NewPoolError,
        now: DateTime<Utc>,
    ) -> StateResult<PoolError> {
        let record = PoolError {
            error_id: uuid::Uuid::new_v4().to_string(),
            worker_pool_id: worker_pool_id.to_string(),
            kind: error.kind,
            title: error.title,
            description: error.description,
            extra: error.extra,
            launch_config_id: error.launch_config_id,
            reported: now,
        };
        let created = self.create(record)?.into_inner();
        warn!(
            worker_pool_id,
            kind = %created.kind,
            launch_config_id = ?created.launch_config_id,
            title = %created.title,
            "worker pool error reported"
        );
        Ok(created)
    }

    /// Retained errors of a pool, oldest first.
    pub fn pool_errors(&self, worker_pool_id: &str) -> StateResult<Vec<PoolError>> {
        let mut errors: Vec<PoolError> = self
            .list_all::<PoolError, _>(&pool_prefix(worker_pool_id), |_| true)?
            .into_iter()
            .map(Versioned::into_inner)
            .collect();
        errors.sort_by(|a, b| (a.reported, &a.error_id).cmp(&(b.reported, &b.error_id)));
        Ok(errors)
    }

    pub fn list_pool_errors(
        &self,
        worker_pool_id: &str,
        page: PageRequest,
    ) -> StateResult<Page<Versioned<PoolError>>> {
        let page = PageRequest {
            prefix: Some(pool_prefix(worker_pool_id)),
            ..page
        };
        self.list(&page, |_| true)
    }

    /// Delete error reports older than `before`. Returns how many went.
    pub fn expire_pool_errors(&self, before: DateTime<Utc>) -> StateResult<u32> {
        let expired = self.list_all::<PoolError, _>("", |e| e.reported < before)?;
        let mut count = 0;
        for error in expired {
            let key = format!("{}/{}", error.worker_pool_id, error.error_id);
            if self.delete::<PoolError>(&key)? {
                count += 1;
            }
        }
        if count > 0 {
            debug!(count, "worker pool errors expired");
        }
        Ok(count)
    }
}
