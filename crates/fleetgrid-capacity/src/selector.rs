//! Weighted launch config selection.
//!
//! Each active launch config of a pool starts with its configured initial
//! weight. Pool stats derate that weight by how much of the config's
//! capacity is already in use and by its share of the pool's recent
//! errors, so new capacity drifts towards configs with room and away from
//! ones that keep failing.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use fleetgrid_metrics::{MonitorEvent, MonitorSink};
use fleetgrid_state::{LaunchConfig, Pool, PoolStats};

/// Weight given to a fully derated config when it is the only one left
/// with room, so a pool never starves outright.
pub const STARVATION_FLOOR_WEIGHT: f64 = 0.01;

/// A launch config eligible for sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedConfig {
    pub launch_config: LaunchConfig,
    pub weight: f64,
    pub remaining_capacity: u64,
}

/// Builds [`WeightedRandomConfig`]s for pools.
pub struct LaunchConfigSelector {
    monitor: Arc<dyn MonitorSink>,
}

impl LaunchConfigSelector {
    pub fn new(monitor: Arc<dyn MonitorSink>) -> Self {
        Self { monitor }
    }

    /// Weigh `configs` (the pool's active launch configs) using an
    /// OS-seeded RNG.
    pub fn for_pool(
        &self,
        pool: &Pool,
        configs: &[LaunchConfig],
        stats: Option<&PoolStats>,
    ) -> WeightedRandomConfig<StdRng> {
        self.for_pool_with_rng(pool, configs, stats, StdRng::from_os_rng())
    }

    /// Same as [`Self::for_pool`] with a caller-supplied RNG.
    pub fn for_pool_with_rng<R: Rng>(
        &self,
        pool: &Pool,
        configs: &[LaunchConfig],
        stats: Option<&PoolStats>,
        rng: R,
    ) -> WeightedRandomConfig<R> {
        let pool_max = u64::from(pool.config.max_capacity);
        let total_errors = stats.map_or(0, |s| s.total_errors);

        let mut derated: Vec<(LaunchConfig, f64, u64)> = Vec::with_capacity(configs.len());
        for lc in configs.iter().filter(|lc| !lc.is_archived) {
            let initial = lc.spec.initial_weight;
            let cap = lc.spec.max_capacity.map_or(pool_max, u64::from);
            let mut weight = initial;
            let mut remaining = cap;
            if let Some(stats) = stats {
                let used = stats.used_capacity(&lc.launch_config_id);
                let used_share = if cap == 0 { 1.0 } else { used as f64 / cap as f64 };
                weight -= initial * used_share;
                if total_errors > 0 {
                    weight -= initial * stats.errors(&lc.launch_config_id) as f64 / total_errors as f64;
                }
                remaining = cap.saturating_sub(used);
            }
            if initial <= 0.0 {
                // Disabled configs are reported but never sampled.
                weight = 0.0;
            }
            derated.push((lc.clone(), weight, remaining));
        }

        let with_room = derated
            .iter()
            .filter(|(lc, _, remaining)| lc.spec.initial_weight > 0.0 && *remaining > 0)
            .count();
        let mut weights = BTreeMap::new();
        let mut remaining_capacity = BTreeMap::new();
        let mut candidates = Vec::new();
        for (lc, weight, remaining) in derated {
            let weight = if weight > 0.0 {
                weight
            } else if with_room == 1 && remaining > 0 && lc.spec.initial_weight > 0.0 {
                STARVATION_FLOOR_WEIGHT
            } else {
                0.0
            };
            weights.insert(lc.launch_config_id.clone(), weight);
            remaining_capacity.insert(lc.launch_config_id.clone(), remaining);
            if weight > 0.0 && remaining > 0 {
                candidates.push(WeightedConfig {
                    launch_config: lc,
                    weight,
                    remaining_capacity: remaining,
                });
            }
        }

        debug!(
            worker_pool_id = %pool.worker_pool_id,
            candidates = candidates.len(),
            "launch config weights computed"
        );
        self.monitor.record(MonitorEvent::SelectorWeights {
            worker_pool_id: pool.worker_pool_id.clone(),
            weights,
            remaining_capacity,
        });

        WeightedRandomConfig {
            configs: candidates,
            rng,
        }
    }
}

/// Launch configs of one pool, ready for weighted sampling.
pub struct WeightedRandomConfig<R = StdRng> {
    configs: Vec<WeightedConfig>,
    rng: R,
}

impl WeightedRandomConfig<StdRng> {
    /// Sample from pre-weighted configs with a fixed seed.
    pub fn seeded(configs: Vec<WeightedConfig>, seed: u64) -> Self {
        Self {
            configs,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng> WeightedRandomConfig<R> {
    /// Configs that can still be sampled.
    pub fn get_all(&self) -> &[WeightedConfig] {
        &self.configs
    }

    pub fn total_weight(&self) -> f64 {
        self.configs.iter().map(|c| c.weight).sum()
    }

    fn pick_index(&mut self) -> Option<usize> {
        let total = self.total_weight();
        if self.configs.is_empty() || total <= 0.0 || !total.is_finite() {
            return None;
        }
        let draw = self.rng.random_range(0.0..total);
        let mut cumulative = 0.0;
        for (index, config) in self.configs.iter().enumerate() {
            cumulative += config.weight;
            if cumulative > draw {
                return Some(index);
            }
        }
        // Float rounding can leave the draw just past the last bucket.
        Some(self.configs.len() - 1)
    }

    /// One weighted draw, without consuming capacity.
    pub fn get_random_config(&mut self) -> Option<&LaunchConfig> {
        let index = self.pick_index()?;
        Some(&self.configs[index].launch_config)
    }

    /// Draw configs until `capacity` units are covered or none have room.
    ///
    /// Every draw consumes the config's `capacity_per_instance` from its
    /// remaining capacity; a config with no room left drops out.
    pub fn select_capacity(&mut self, capacity: u64) -> Vec<LaunchConfig> {
        let mut selected = Vec::new();
        let mut covered = 0u64;
        while covered < capacity {
            let Some(index) = self.pick_index() else {
                break;
            };
            let entry = &mut self.configs[index];
            let per_instance = u64::from(entry.launch_config.capacity_per_instance());
            covered = covered.saturating_add(per_instance);
            entry.remaining_capacity = entry.remaining_capacity.saturating_sub(per_instance);
            selected.push(entry.launch_config.clone());
            if entry.remaining_capacity == 0 {
                self.configs.remove(index);
            }
        }
        selected
    }
}
