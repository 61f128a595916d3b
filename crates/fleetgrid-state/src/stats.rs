//! Per-pool capacity statistics, folded from workers and error reports.
//!
//! Stats are recomputed on every sweep and never persisted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::*;

/// Capacity and counts of live workers, by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CapacityBreakdown {
    /// Running capacity, quarantined workers excluded.
    pub existing_capacity: u64,
    pub requested_capacity: u64,
    pub stopping_capacity: u64,
    pub quarantined_capacity: u64,
    pub requested_count: u32,
    pub running_count: u32,
    pub stopping_count: u32,
    pub quarantined_count: u32,
}

impl CapacityBreakdown {
    fn add(&mut self, worker: &Worker, now: DateTime<Utc>) {
        let capacity = u64::from(worker.capacity);
        match worker.state {
            WorkerState::Stopped => {}
            WorkerState::Stopping => {
                self.stopping_capacity += capacity;
                self.stopping_count += 1;
            }
            _ if worker.is_quarantined(now) => {
                self.quarantined_capacity += capacity;
                self.quarantined_count += 1;
            }
            WorkerState::Running => {
                self.existing_capacity += capacity;
                self.running_count += 1;
            }
            WorkerState::Requested => {
                self.requested_capacity += capacity;
                self.requested_count += 1;
            }
        }
    }
}

/// Derived statistics of one pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub worker_pool_id: WorkerPoolId,
    pub totals: CapacityBreakdown,
    /// Capacity of non-stopped workers per launch config.
    pub capacity_by_launch_config: BTreeMap<String, u64>,
    pub errors_by_launch_config: BTreeMap<String, u64>,
    /// Every retained error of the pool, attributed or not.
    pub total_errors: u64,
    pub by_worker_group: BTreeMap<String, CapacityBreakdown>,
}

impl PoolStats {
    /// Fold workers and errors into stats.
    pub fn compute<'a>(
        worker_pool_id: &str,
        workers: impl IntoIterator<Item = &'a Worker>,
        errors: impl IntoIterator<Item = &'a PoolError>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut stats = PoolStats {
            worker_pool_id: worker_pool_id.to_string(),
            ..PoolStats::default()
        };
        for worker in workers {
            if !worker.state.is_live() {
                continue;
            }
            stats.totals.add(worker, now);
            stats
                .by_worker_group
                .entry(worker.worker_group.clone())
                .or_default()
                .add(worker, now);
            if let Some(lc) = &worker.launch_config_id {
                *stats.capacity_by_launch_config.entry(lc.clone()).or_default() +=
                    u64::from(worker.capacity);
            }
        }
        for error in errors {
            stats.total_errors += 1;
            if let Some(lc) = &error.launch_config_id {
                *stats.errors_by_launch_config.entry(lc.clone()).or_default() += 1;
            }
        }
        stats
    }

    pub fn used_capacity(&self, launch_config_id: &str) -> u64 {
        self.capacity_by_launch_config
            .get(launch_config_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn errors(&self, launch_config_id: &str) -> u64 {
        self.errors_by_launch_config
            .get(launch_config_id)
            .copied()
            .unwrap_or(0)
    }
}

impl StateStore {
    /// Current stats of a pool.
    pub fn pool_stats(&self, worker_pool_id: &str, now: DateTime<Utc>) -> StateResult<PoolStats> {
        let workers = self.live_workers(worker_pool_id)?;
        let errors = self.pool_errors(worker_pool_id)?;
        Ok(PoolStats::compute(
            worker_pool_id,
            workers.iter().map(|w| &w.record),
            errors.iter(),
            now,
        ))
    }
}
