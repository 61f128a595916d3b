//! Provisioner: the loop that asks providers for new capacity.
//!
//! For every pool on a dynamic provider it estimates the missing capacity,
//! picks launch configs for it and asks the provider for one machine per
//! pick. Each machine is recorded as a REQUESTED worker through an
//! idempotent create, so a crashed or replayed tick never double-counts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fleetgrid_capacity::{CapacityEstimator, EstimateInput, LaunchConfigSelector};
use fleetgrid_metrics::{MonitorEvent, MonitorSink};
use fleetgrid_state::{
    LaunchConfig, NewPoolError, Pool, Record, StateResult, StateStore, Versioned, Worker,
};

use crate::lifecycle::deadline_after;
use crate::provider::{Provider, ProviderRegistry};
use crate::queue::QueueOracle;

/// Error kind recorded when a provider fails to create a worker.
pub const CREATION_ERROR_KIND: &str = "creation-error";

/// Knobs of the provisioning loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionerConfig {
    pub interval: Duration,
    /// Queue inactivity timeout stamped on workers whose pool sets none.
    pub default_queue_inactivity_timeout: Duration,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            default_queue_inactivity_timeout: Duration::from_secs(7200),
        }
    }
}

/// What one pool's provisioning pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolProvisioning {
    pub worker_pool_id: String,
    pub to_spawn: u32,
    /// Keys of the workers recorded this pass.
    pub requested: Vec<String>,
    /// Provider creations that failed and were reported as pool errors.
    pub failed: u32,
}

/// Summary of a full provisioning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub pools: Vec<PoolProvisioning>,
    /// Pools skipped because their provider is not dynamic or not known.
    pub skipped: Vec<String>,
    /// Pools whose pass failed, with the error.
    pub failed: Vec<(String, String)>,
    /// (pool, provider) pairs whose cleanup finished this pass.
    pub released_providers: Vec<(String, String)>,
}

/// The provisioning loop.
pub struct Provisioner {
    store: StateStore,
    registry: ProviderRegistry,
    queue: Arc<dyn QueueOracle>,
    estimator: Arc<CapacityEstimator>,
    selector: LaunchConfigSelector,
    monitor: Arc<dyn MonitorSink>,
    config: ProvisionerConfig,
}

impl Provisioner {
    pub fn new(
        store: StateStore,
        registry: ProviderRegistry,
        queue: Arc<dyn QueueOracle>,
        monitor: Arc<dyn MonitorSink>,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            queue,
            estimator: Arc::new(CapacityEstimator::new(monitor.clone())),
            selector: LaunchConfigSelector::new(monitor.clone()),
            monitor,
            config,
        }
    }

    /// One pass over every pool. Failures are isolated per pool.
    pub async fn provision_all(&self, now: DateTime<Utc>) -> anyhow::Result<ProvisionReport> {
        let pools = self.store.list_all::<Pool, _>("", |_| true)?;
        let mut report = ProvisionReport::default();
        for pool in pools {
            let pool = pool.into_inner();
            match self.release_previous_providers(&pool) {
                Ok(released) => report.released_providers.extend(
                    released
                        .into_iter()
                        .map(|provider_id| (pool.worker_pool_id.clone(), provider_id)),
                ),
                Err(e) => {
                    warn!(worker_pool_id = %pool.worker_pool_id, error = %e, "previous provider cleanup failed")
                }
            }
            let Some(provider) = self.managed_provider(&pool) else {
                report.skipped.push(pool.worker_pool_id.clone());
                continue;
            };
            match self.provision_pool(&pool, provider.as_ref(), now).await {
                Ok(result) => report.pools.push(result),
                Err(e) => {
                    error!(worker_pool_id = %pool.worker_pool_id, error = %e, "provisioning failed");
                    self.monitor.record(MonitorEvent::ProvisionFailure {
                        worker_pool_id: pool.worker_pool_id.clone(),
                        message: e.to_string(),
                    });
                    report.failed.push((pool.worker_pool_id, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    fn managed_provider(&self, pool: &Pool) -> Option<Arc<dyn Provider>> {
        match self.registry.get(&pool.provider_id) {
            Some(provider) if provider.kind().is_managed() => Some(provider),
            Some(_) => None,
            None => {
                warn!(
                    worker_pool_id = %pool.worker_pool_id,
                    provider_id = %pool.provider_id,
                    "pool names an unknown provider"
                );
                None
            }
        }
    }

    /// Forget previous providers that no longer own live workers.
    fn release_previous_providers(&self, pool: &Pool) -> StateResult<Vec<String>> {
        if pool.previous_provider_ids.is_empty() {
            return Ok(Vec::new());
        }
        let live = self.store.live_workers(&pool.worker_pool_id)?;
        let mut released = Vec::new();
        for provider_id in &pool.previous_provider_ids {
            if live.iter().any(|w| &w.provider_id == provider_id) {
                continue;
            }
            self.store
                .remove_previous_provider_id(&pool.worker_pool_id, provider_id)?;
            info!(worker_pool_id = %pool.worker_pool_id, %provider_id, "previous provider released");
            released.push(provider_id.clone());
        }
        Ok(released)
    }

    /// Estimate, select and create capacity for one pool.
    pub async fn provision_pool(
        &self,
        pool: &Pool,
        provider: &dyn Provider,
        now: DateTime<Utc>,
    ) -> anyhow::Result<PoolProvisioning> {
        let pool_id = pool.worker_pool_id.as_str();
        let mut result = PoolProvisioning {
            worker_pool_id: pool_id.to_string(),
            ..PoolProvisioning::default()
        };

        let counts = self.queue.task_queue_counts(pool_id).await?;
        let stats = self.store.pool_stats(pool_id, now)?;
        let input = EstimateInput::for_pool(
            &pool.config,
            &stats.totals,
            counts.pending_tasks,
            counts.claimed_tasks,
        );
        let estimate = self.estimator.simple(pool_id, &input);
        result.to_spawn = estimate.to_spawn;
        if estimate.to_spawn == 0 {
            debug!(worker_pool_id = %pool_id, "no capacity to request");
            return Ok(result);
        }

        let configs: Vec<LaunchConfig> = self
            .store
            .active_launch_configs(pool_id)?
            .into_iter()
            .map(Versioned::into_inner)
            .collect();
        let selected = self
            .selector
            .for_pool(pool, &configs, Some(&stats))
            .select_capacity(u64::from(estimate.to_spawn));
        if selected.is_empty() {
            warn!(worker_pool_id = %pool_id, to_spawn = estimate.to_spawn, "no launch config has room");
        }

        for launch_config in selected {
            match provider.create_worker(pool, &launch_config).await {
                Ok(created) => {
                    let worker = self.requested_worker(pool, provider, &launch_config, created, now);
                    let worker = self.store.create_worker(worker)?;
                    result.requested.push(worker.key());
                }
                Err(e) => {
                    result.failed += 1;
                    self.store.report_error(
                        pool_id,
                        NewPoolError::new(
                            CREATION_ERROR_KIND,
                            "Instance Creation Error",
                            format!("{e:#}"),
                        )
                        .for_launch_config(&launch_config.launch_config_id),
                        now,
                    )?;
                }
            }
        }

        info!(
            worker_pool_id = %pool_id,
            to_spawn = result.to_spawn,
            requested = result.requested.len(),
            failed = result.failed,
            "pool provisioned"
        );
        Ok(result)
    }

    fn requested_worker(
        &self,
        pool: &Pool,
        provider: &dyn Provider,
        launch_config: &LaunchConfig,
        created: crate::provider::ProvisionedWorker,
        now: DateTime<Utc>,
    ) -> Worker {
        let lifecycle = &pool.config.lifecycle;
        let expires = deadline_after(now, lifecycle.reregistration_timeout());
        let mut worker = Worker::requested(
            &pool.worker_pool_id,
            &created.worker_group,
            &created.worker_id,
            provider.provider_id(),
            launch_config.capacity_per_instance(),
            now,
            expires,
        )
        .with_launch_config(&launch_config.launch_config_id);

        let zombie = &mut worker.provider_state.zombie;
        zombie.queue_inactivity_timeout_secs = Some(
            lifecycle
                .queue_inactivity_timeout(self.config.default_queue_inactivity_timeout)
                .as_secs(),
        );
        zombie.terminate_after = lifecycle
            .registration_timeout_secs
            .map(|secs| deadline_after(now, Duration::from_secs(secs)));
        worker.provider_state.extra = created.extra;
        worker
    }

    /// Run the provisioning loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "provisioner started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.provision_all(Utc::now()).await {
                        Ok(report) => debug!(
                            pools = report.pools.len(),
                            skipped = report.skipped.len(),
                            failed = report.failed.len(),
                            "provisioning pass finished"
                        ),
                        Err(e) => error!(error = %e, "provisioning pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("provisioner shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticProvider;
    use crate::queue::StaticQueue;
    use crate::testing::TestingProvider;
    use fleetgrid_metrics::RecordingMonitor;
    use fleetgrid_state::{LaunchConfigSpec, NULL_PROVIDER, PoolConfig, PoolUpdate, WorkerState};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    struct Harness {
        store: StateStore,
        queue: Arc<StaticQueue>,
        provider: Arc<TestingProvider>,
        monitor: Arc<RecordingMonitor>,
        provisioner: Provisioner,
    }

    fn harness() -> Harness {
        let store = StateStore::open_in_memory().unwrap();
        let queue = Arc::new(StaticQueue::new());
        let provider = Arc::new(TestingProvider::new("testing"));
        let monitor = Arc::new(RecordingMonitor::new());
        let registry = ProviderRegistry::new()
            .with(provider.clone())
            .with(Arc::new(StaticProvider::new("hardware")));
        let provisioner = Provisioner::new(
            store.clone(),
            registry,
            queue.clone(),
            monitor.clone(),
            ProvisionerConfig::default(),
        );
        Harness {
            store,
            queue,
            provider,
            monitor,
            provisioner,
        }
    }

    fn pool(id: &str, provider: &str, max: u32, lcs: &[(&str, u32)]) -> Pool {
        let mut config = PoolConfig::with_capacity(0, max);
        config.launch_configs = lcs
            .iter()
            .map(|(id, cpi)| {
                let mut spec = LaunchConfigSpec::new(json!({"region": "r1"})).with_id(*id);
                spec.capacity_per_instance = *cpi;
                spec
            })
            .collect();
        config.lifecycle.registration_timeout_secs = Some(900);
        Pool::new(id, provider, config, "me", now())
    }

    #[tokio::test]
    async fn pending_work_becomes_requested_workers() {
        let h = harness();
        h.store
            .create_pool(pool("proj/builder", "testing", 10, &[("lc1", 1)]))
            .unwrap();
        h.queue.set("proj/builder", 3, 0);

        let report = h.provisioner.provision_all(now()).await.unwrap();
        assert_eq!(report.pools.len(), 1);
        assert_eq!(report.pools[0].to_spawn, 3);
        assert_eq!(report.pools[0].requested.len(), 3);

        let workers = h.store.live_workers("proj/builder").unwrap();
        assert_eq!(workers.len(), 3);
        let w = &workers[0];
        assert_eq!(w.state, WorkerState::Requested);
        assert_eq!(w.launch_config_id.as_deref(), Some("lc1"));
        assert_eq!(w.provider_state.zombie.queue_inactivity_timeout_secs, Some(7200));
        assert_eq!(
            w.provider_state.zombie.terminate_after,
            Some(now() + chrono::Duration::seconds(900))
        );
        assert!(w.provider_state.extra("machine").is_some());
        assert_eq!(h.monitor.named("estimate").len(), 1);
        assert_eq!(h.monitor.named("selector-weights").len(), 1);

        // Requested capacity counts against the next tick.
        let report = h.provisioner.provision_all(now()).await.unwrap();
        assert_eq!(report.pools[0].to_spawn, 0);
        assert_eq!(h.provider.created().len(), 3);
    }

    #[tokio::test]
    async fn capacity_per_instance_reduces_machine_count() {
        let h = harness();
        h.store
            .create_pool(pool("proj/builder", "testing", 10, &[("big", 4)]))
            .unwrap();
        h.queue.set("proj/builder", 6, 0);

        h.provisioner.provision_all(now()).await.unwrap();
        assert_eq!(h.store.pool_capacity("proj/builder").unwrap(), 8);
        assert_eq!(h.provider.created().len(), 2);
    }

    #[tokio::test]
    async fn creation_failures_become_pool_errors() {
        let h = harness();
        h.store
            .create_pool(pool("proj/builder", "testing", 10, &[("lc1", 1)]))
            .unwrap();
        h.queue.set("proj/builder", 2, 0);
        h.provider.fail_launch_config("lc1");

        let report = h.provisioner.provision_all(now()).await.unwrap();
        assert_eq!(report.pools[0].failed, 2);
        let errors = h.store.pool_errors("proj/builder").unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].kind, CREATION_ERROR_KIND);
        assert_eq!(errors[0].launch_config_id.as_deref(), Some("lc1"));
    }

    #[tokio::test]
    async fn static_null_and_unknown_providers_are_skipped() {
        let h = harness();
        h.store
            .create_pool(pool("proj/static", "hardware", 10, &[]))
            .unwrap();
        h.store
            .create_pool(pool("proj/off", NULL_PROVIDER, 10, &[]))
            .unwrap();
        h.store
            .create_pool(pool("proj/mystery", "nowhere", 10, &[]))
            .unwrap();
        for id in ["proj/static", "proj/off", "proj/mystery"] {
            h.queue.set(id, 5, 0);
        }

        let report = h.provisioner.provision_all(now()).await.unwrap();
        assert!(report.pools.is_empty());
        assert_eq!(report.skipped.len(), 3);
        assert!(h.provider.created().is_empty());
    }

    #[tokio::test]
    async fn previous_provider_is_released_once_its_workers_are_gone() {
        let h = harness();
        h.store
            .create_pool(pool("proj/builder", "hardware", 10, &[]))
            .unwrap();
        h.store
            .create_worker(Worker::requested(
                "proj/builder",
                "g",
                "old",
                "hardware",
                1,
                now(),
                now() + chrono::Duration::days(1),
            ))
            .unwrap();
        h.store
            .update_pool("proj/builder", &PoolUpdate::provider("testing"), now())
            .unwrap();

        h.provisioner.provision_all(now()).await.unwrap();
        assert_eq!(
            h.store.pool("proj/builder").unwrap().previous_provider_ids,
            vec!["hardware".to_string()]
        );

        h.store
            .update_worker("proj/builder", "g", "old", |w| w.transition(WorkerState::Stopped))
            .unwrap();
        let report = h.provisioner.provision_all(now()).await.unwrap();
        assert!(h.store.pool("proj/builder").unwrap().previous_provider_ids.is_empty());
        assert_eq!(
            report.released_providers,
            vec![("proj/builder".to_string(), "hardware".to_string())]
        );
    }
}
