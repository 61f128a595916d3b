//! In-memory metrics registry fed by monitor events.
//!
//! Keeps the latest estimate per pool as gauges and accumulates counters
//! for alerts, terminations and failures. [`MetricsRegistry::snapshot`]
//! hands a consistent copy to the Prometheus renderer.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::monitor::{MonitorEvent, MonitorSink};

/// Latest capacity picture of one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolGauges {
    pub pending_tasks: i64,
    pub claimed_tasks: i64,
    pub existing_capacity: i64,
    pub requested_capacity: i64,
    pub stopping_capacity: i64,
    pub desired_capacity: u32,
    pub to_spawn: u32,
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub pools: BTreeMap<String, PoolGauges>,
    /// Launch config weights by (pool, launch config).
    pub launch_config_weights: BTreeMap<(String, String), f64>,
    pub over_capacity_alerts: BTreeMap<String, u64>,
    /// Workers marked for termination by (pool, provider, reason), last scan.
    pub workers_to_terminate: BTreeMap<(String, String, String), u64>,
    pub scan_failures: BTreeMap<String, u64>,
    pub provision_failures: BTreeMap<String, u64>,
}

/// Thread-safe registry; also a [`MonitorSink`].
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .map(|inner| inner.clone())
            .unwrap_or_default()
    }
}

impl MonitorSink for MetricsRegistry {
    fn record(&self, event: MonitorEvent) {
        let Ok(mut m) = self.inner.lock() else {
            return;
        };
        match event {
            MonitorEvent::Estimate {
                worker_pool_id,
                pending_tasks,
                claimed_tasks,
                existing_capacity,
                requested_capacity,
                stopping_capacity,
                desired_capacity,
                to_spawn,
                ..
            } => {
                m.pools.insert(
                    worker_pool_id,
                    PoolGauges {
                        pending_tasks,
                        claimed_tasks,
                        existing_capacity,
                        requested_capacity,
                        stopping_capacity,
                        desired_capacity,
                        to_spawn,
                    },
                );
            }
            MonitorEvent::SelectorWeights {
                worker_pool_id,
                weights,
                ..
            } => {
                m.launch_config_weights
                    .retain(|(pool, _), _| *pool != worker_pool_id);
                for (lc, weight) in weights {
                    m.launch_config_weights
                        .insert((worker_pool_id.clone(), lc), weight);
                }
            }
            MonitorEvent::OverCapacity { worker_pool_id, .. } => {
                *m.over_capacity_alerts.entry(worker_pool_id).or_default() += 1;
            }
            MonitorEvent::WorkersToTerminate {
                worker_pool_id,
                provider_id,
                reason,
                count,
            } => {
                m.workers_to_terminate
                    .insert((worker_pool_id, provider_id, reason), count);
            }
            MonitorEvent::ScanFailure { worker_pool_id, .. } => {
                *m.scan_failures.entry(worker_pool_id).or_default() += 1;
            }
            MonitorEvent::ProvisionFailure { worker_pool_id, .. } => {
                *m.provision_failures.entry(worker_pool_id).or_default() += 1;
            }
        }
    }
}
