//! Capacity estimation: how much capacity a pool should have.
//!
//! All inputs are signed so that inconsistent counts (a queue reporting
//! more claimed tasks than there are workers, say) clamp to zero instead of
//! failing. Products with the scaling ratio round up.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use fleetgrid_metrics::{MonitorEvent, MonitorSink};
use fleetgrid_state::{CapacityBreakdown, PoolConfig};

/// Everything the estimator looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimateInput {
    pub pending_tasks: i64,
    pub claimed_tasks: i64,
    pub existing_capacity: i64,
    pub requested_capacity: i64,
    pub stopping_capacity: i64,
    pub min_capacity: i64,
    pub max_capacity: i64,
    pub scaling_ratio: f64,
}

impl Default for EstimateInput {
    fn default() -> Self {
        Self {
            pending_tasks: 0,
            claimed_tasks: 0,
            existing_capacity: 0,
            requested_capacity: 0,
            stopping_capacity: 0,
            min_capacity: 0,
            max_capacity: 0,
            scaling_ratio: 1.0,
        }
    }
}

impl EstimateInput {
    /// Inputs for a pool from its config, current stats and queue counts.
    pub fn for_pool(
        config: &PoolConfig,
        totals: &CapacityBreakdown,
        pending_tasks: u64,
        claimed_tasks: u64,
    ) -> Self {
        Self {
            pending_tasks: saturating_i64(pending_tasks),
            claimed_tasks: saturating_i64(claimed_tasks),
            existing_capacity: saturating_i64(totals.existing_capacity),
            requested_capacity: saturating_i64(totals.requested_capacity),
            stopping_capacity: saturating_i64(totals.stopping_capacity),
            min_capacity: i64::from(config.min_capacity),
            max_capacity: i64::from(config.max_capacity),
            scaling_ratio: config.scaling_ratio,
        }
    }

    fn ratio(&self) -> f64 {
        if self.scaling_ratio.is_finite() {
            self.scaling_ratio.max(0.0)
        } else {
            1.0
        }
    }

    fn bounds(&self) -> (i64, i64) {
        let min = self.min_capacity.max(0);
        (min, self.max_capacity.max(0))
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn scale(count: i64, ratio: f64) -> i64 {
    let scaled = (count.max(0) as f64 * ratio).ceil();
    if scaled >= i64::MAX as f64 {
        i64::MAX
    } else {
        scaled as i64
    }
}

fn clamp(value: i64, min: i64, max: i64) -> u32 {
    let bounded = value.min(max).max(min).max(0);
    u32::try_from(bounded).unwrap_or(u32::MAX)
}

/// Capacity a pool should run, given demand on top of what it already has.
///
/// Idle capacity (existing minus claimed) absorbs part of the pending work;
/// the remainder is scaled by the pool's ratio and added to everything that
/// already exists or is stopping.
pub fn desired_capacity(input: &EstimateInput) -> u32 {
    let existing = input.existing_capacity.max(0);
    let idle = (existing - input.claimed_tasks.max(0)).max(0);
    let adjusted_pending = (input.pending_tasks.max(0) - idle).max(0);
    let desired = scale(adjusted_pending, input.ratio())
        .saturating_add(existing)
        .saturating_add(input.stopping_capacity.max(0));
    let (min, max) = input.bounds();
    clamp(desired, min, max)
}

/// Capacity the whole fleet of a pool should have, from queue counts alone.
pub fn target_capacity(input: &EstimateInput) -> u32 {
    let demand = input
        .pending_tasks
        .max(0)
        .saturating_add(input.claimed_tasks.max(0));
    let (min, max) = input.bounds();
    clamp(scale(demand, input.ratio()), min, max)
}

/// Outcome of [`CapacityEstimator::simple`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    pub desired_capacity: u32,
    /// Additional capacity to request this tick.
    pub to_spawn: u32,
}

/// Stateful wrapper around the estimate math.
///
/// The only state is which pools are currently flagged as over capacity,
/// so the alert fires once per transition instead of on every tick.
pub struct CapacityEstimator {
    monitor: Arc<dyn MonitorSink>,
    over_capacity: Mutex<HashSet<String>>,
}

impl CapacityEstimator {
    pub fn new(monitor: Arc<dyn MonitorSink>) -> Self {
        Self {
            monitor,
            over_capacity: Mutex::new(HashSet::new()),
        }
    }

    /// Capacity to request for a pool this tick.
    ///
    /// Requested capacity counts as existing when sizing demand, and both
    /// requested and stopping capacity count against the result.
    pub fn simple(&self, worker_pool_id: &str, input: &EstimateInput) -> Estimate {
        let non_stopped = input
            .existing_capacity
            .max(0)
            .saturating_add(input.requested_capacity.max(0));
        let desired = desired_capacity(&EstimateInput {
            existing_capacity: non_stopped,
            ..*input
        });
        let to_spawn = (i64::from(desired) - non_stopped - input.stopping_capacity.max(0)).max(0);
        let estimate = Estimate {
            desired_capacity: desired,
            to_spawn: u32::try_from(to_spawn).unwrap_or(u32::MAX),
        };

        self.check_over_capacity(worker_pool_id, input);
        self.monitor.record(MonitorEvent::Estimate {
            worker_pool_id: worker_pool_id.to_string(),
            pending_tasks: input.pending_tasks,
            claimed_tasks: input.claimed_tasks,
            min_capacity: input.min_capacity,
            max_capacity: input.max_capacity,
            scaling_ratio: input.scaling_ratio,
            existing_capacity: input.existing_capacity,
            requested_capacity: input.requested_capacity,
            stopping_capacity: input.stopping_capacity,
            desired_capacity: estimate.desired_capacity,
            to_spawn: estimate.to_spawn,
        });
        estimate
    }

    fn check_over_capacity(&self, worker_pool_id: &str, input: &EstimateInput) {
        let over = input.existing_capacity > input.max_capacity.max(0);
        let mut flagged = self
            .over_capacity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !over {
            flagged.remove(worker_pool_id);
            return;
        }
        if !flagged.insert(worker_pool_id.to_string()) {
            return;
        }
        drop(flagged);
        warn!(
            %worker_pool_id,
            existing_capacity = input.existing_capacity,
            max_capacity = input.max_capacity,
            "worker pool has more existing capacity than its maximum"
        );
        self.monitor.record(MonitorEvent::OverCapacity {
            worker_pool_id: worker_pool_id.to_string(),
            existing_capacity: input.existing_capacity,
            max_capacity: input.max_capacity,
        });
    }
}
