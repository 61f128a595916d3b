//! FleetScanner: the periodic sweep that decides which workers go.
//!
//! Per pool: size the whole fleet from queue depth, let the provider look
//! at every live worker, run the termination rules and write each verdict
//! back. Failures stay inside the worker or pool that caused them.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use fleetgrid_capacity::{EstimateInput, target_capacity};
use fleetgrid_metrics::{MonitorEvent, MonitorSink};
use fleetgrid_provision::{ProviderRegistry, QueueOracle, WorkerCheck};
use fleetgrid_state::{
    CapacityBreakdown, Pool, StateStore, Verdict, VerdictReason, Versioned, Worker, WorkerState,
};

use crate::verdict::{self, RuleContext};

/// Reasons counted by the `workers-to-terminate` metric.
const TERMINATING_REASONS: [VerdictReason; 6] = [
    VerdictReason::LaunchConfigArchived,
    VerdictReason::RegistrationTimeout,
    VerdictReason::NeverClaimed,
    VerdictReason::NeverReclaimed,
    VerdictReason::Inactive,
    VerdictReason::OverCapacity,
];

/// Knobs of the scanning loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannerConfig {
    pub interval: Duration,
    /// Longest a single pool may take.
    pub pool_timeout: Duration,
    /// Longest a whole sweep may take; pools not reached are reported.
    pub scan_deadline: Duration,
    pub default_queue_inactivity_timeout: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            pool_timeout: Duration::from_secs(30),
            scan_deadline: Duration::from_secs(300),
            default_queue_inactivity_timeout: Duration::from_secs(7200),
        }
    }
}

/// A verdict written for one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerVerdict {
    pub worker_group: String,
    pub worker_id: String,
    pub verdict: Verdict,
}

/// Outcome of scanning one pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolScan {
    pub worker_pool_id: String,
    pub target_capacity: u32,
    /// Oldest first.
    pub verdicts: Vec<WorkerVerdict>,
    /// Workers the provider reported gone; they are now STOPPED.
    pub stopped: Vec<String>,
    /// Per-worker failures that were reported and skipped.
    pub worker_failures: u32,
}

impl PoolScan {
    pub fn verdict(&self, worker_id: &str) -> Option<&Verdict> {
        self.verdicts
            .iter()
            .find(|v| v.worker_id == worker_id)
            .map(|v| &v.verdict)
    }
}

/// Outcome of a full sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub pools: Vec<PoolScan>,
    pub skipped: Vec<String>,
    /// Pools whose scan failed or timed out, with the error.
    pub failed: Vec<(String, String)>,
    /// Pools the sweep deadline cut off.
    pub not_scanned: Vec<String>,
}

/// Periodic sweep assigning a verdict to every live worker.
pub struct FleetScanner {
    store: StateStore,
    registry: ProviderRegistry,
    queue: Arc<dyn QueueOracle>,
    monitor: Arc<dyn MonitorSink>,
    config: ScannerConfig,
}

impl FleetScanner {
    pub fn new(
        store: StateStore,
        registry: ProviderRegistry,
        queue: Arc<dyn QueueOracle>,
        monitor: Arc<dyn MonitorSink>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            queue,
            monitor,
            config,
        }
    }

    /// Scan every pool once.
    pub async fn scan_all(&self, now: DateTime<Utc>) -> anyhow::Result<ScanReport> {
        let deadline = Instant::now() + self.config.scan_deadline;
        let pools = self.store.list_all::<Pool, _>("", |_| true)?;
        let mut report = ScanReport::default();

        for pool in pools {
            let pool = pool.into_inner();
            let pool_id = pool.worker_pool_id.clone();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                report.not_scanned.push(pool_id);
                continue;
            }
            if !self.should_scan(&pool) {
                report.skipped.push(pool_id);
                continue;
            }

            let budget = remaining.min(self.config.pool_timeout);
            let outcome = match tokio::time::timeout(budget, self.scan_pool(&pool, now)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow::anyhow!("scan timed out after {budget:?}")),
            };
            match outcome {
                Ok(scan) => report.pools.push(scan),
                Err(e) => {
                    error!(worker_pool_id = %pool_id, error = %e, "pool scan failed");
                    self.monitor.record(MonitorEvent::ScanFailure {
                        worker_pool_id: pool_id.clone(),
                        worker: None,
                        message: e.to_string(),
                    });
                    report.failed.push((pool_id, e.to_string()));
                }
            }
        }

        if !report.not_scanned.is_empty() {
            warn!(
                not_scanned = report.not_scanned.len(),
                "scan deadline reached before every pool was scanned"
            );
        }
        Ok(report)
    }

    /// Dynamic pools, and any pool still owing cleanup to a previous provider.
    fn should_scan(&self, pool: &Pool) -> bool {
        match self.registry.get(&pool.provider_id) {
            Some(provider) if provider.kind().is_managed() => true,
            Some(_) => !pool.previous_provider_ids.is_empty(),
            None => {
                warn!(
                    worker_pool_id = %pool.worker_pool_id,
                    provider_id = %pool.provider_id,
                    "pool names an unknown provider"
                );
                !pool.previous_provider_ids.is_empty()
            }
        }
    }

    /// Scan one pool and write a verdict for each of its live workers.
    pub async fn scan_pool(&self, pool: &Pool, now: DateTime<Utc>) -> anyhow::Result<PoolScan> {
        let pool_id = pool.worker_pool_id.as_str();
        let target = if pool.is_null_provider() {
            0
        } else {
            let counts = self.queue.task_queue_counts(pool_id).await?;
            let input = EstimateInput::for_pool(
                &pool.config,
                &CapacityBreakdown::default(),
                counts.pending_tasks,
                counts.claimed_tasks,
            );
            target_capacity(&input)
        };

        let mut scan = PoolScan {
            worker_pool_id: pool_id.to_string(),
            target_capacity: target,
            ..PoolScan::default()
        };

        let mut workers = Vec::new();
        for worker in self.store.live_workers(pool_id)? {
            let worker_id = worker.worker_id.clone();
            match self.check_worker(worker, now).await {
                Ok(Some(worker)) => workers.push(worker),
                Ok(None) => scan.stopped.push(worker_id),
                Err((worker, e)) => {
                    self.report_worker_failure(&mut scan, &worker, &e);
                    workers.push(worker);
                }
            }
        }

        let active: HashSet<String> = self
            .store
            .active_launch_configs(pool_id)?
            .into_iter()
            .map(|lc| lc.record.launch_config_id)
            .collect();
        let ctx = RuleContext {
            now,
            active_launch_configs: &active,
            target_capacity: target,
            queue_inactivity_timeout: pool
                .config
                .lifecycle
                .queue_inactivity_timeout(self.config.default_queue_inactivity_timeout),
        };
        let ordered: Vec<&Worker> = workers.iter().collect();
        let reasons = verdict::evaluate(&ordered, &ctx);

        let mut to_terminate: BTreeMap<(String, VerdictReason), u64> = TERMINATING_REASONS
            .iter()
            .map(|reason| ((pool.provider_id.clone(), *reason), 0))
            .collect();

        for (worker, reason) in workers.iter().zip(reasons) {
            let decided = Verdict::new(reason, now);
            let written = self.store.update_worker(
                pool_id,
                &worker.worker_group,
                &worker.worker_id,
                |w| {
                    w.provider_state.verdict = Some(decided.clone());
                    w.provider_state.zombie.last_checked = Some(now);
                    w.last_checked = now;
                    Ok(())
                },
            );
            if let Err(e) = written {
                self.report_worker_failure(&mut scan, worker, &anyhow::Error::new(e));
                continue;
            }
            if decided.terminate {
                *to_terminate
                    .entry((worker.provider_id.clone(), reason))
                    .or_default() += 1;
            }
            scan.verdicts.push(WorkerVerdict {
                worker_group: worker.worker_group.clone(),
                worker_id: worker.worker_id.clone(),
                verdict: decided,
            });
        }

        for ((provider_id, reason), count) in to_terminate {
            self.monitor.record(MonitorEvent::WorkersToTerminate {
                worker_pool_id: pool_id.to_string(),
                provider_id,
                reason: reason.as_str().to_string(),
                count,
            });
        }

        debug!(
            worker_pool_id = %pool_id,
            target_capacity = target,
            workers = scan.verdicts.len(),
            terminate = scan.verdicts.iter().filter(|v| v.verdict.terminate).count(),
            "pool scanned"
        );
        Ok(scan)
    }

    /// Let the worker's provider look at it.
    ///
    /// `Ok(None)` means the machine is gone and the worker is now STOPPED.
    async fn check_worker(
        &self,
        worker: Versioned<Worker>,
        now: DateTime<Utc>,
    ) -> Result<Option<Worker>, (Worker, anyhow::Error)> {
        let worker = worker.into_inner();
        let Some(provider) = self.registry.get(&worker.provider_id) else {
            return Ok(Some(worker));
        };
        let check = match provider.check_worker(&worker).await {
            Ok(check) => check,
            Err(e) => return Err((worker, e)),
        };
        let written = match check {
            WorkerCheck::Unchanged => return Ok(Some(worker)),
            WorkerCheck::Updated(extra) => self.store.update_worker(
                &worker.worker_pool_id,
                &worker.worker_group,
                &worker.worker_id,
                |w| {
                    w.provider_state.extra.extend(extra.clone());
                    Ok(())
                },
            ),
            WorkerCheck::Gone => self.store.update_worker(
                &worker.worker_pool_id,
                &worker.worker_group,
                &worker.worker_id,
                |w| {
                    if w.state != WorkerState::Stopped {
                        w.transition(WorkerState::Stopped)?;
                        w.last_modified = now;
                    }
                    Ok(())
                },
            ),
        };
        match written {
            Ok(updated) if updated.state.is_live() => Ok(Some(updated.into_inner())),
            Ok(_) => {
                info!(
                    worker_pool_id = %worker.worker_pool_id,
                    worker_id = %worker.worker_id,
                    "worker is gone, marked stopped"
                );
                Ok(None)
            }
            Err(e) => Err((worker, e.into())),
        }
    }

    fn report_worker_failure(&self, scan: &mut PoolScan, worker: &Worker, e: &anyhow::Error) {
        warn!(
            worker_pool_id = %worker.worker_pool_id,
            worker_group = %worker.worker_group,
            worker_id = %worker.worker_id,
            error = %e,
            "worker scan failed"
        );
        scan.worker_failures += 1;
        self.monitor.record(MonitorEvent::ScanFailure {
            worker_pool_id: worker.worker_pool_id.clone(),
            worker: Some(format!("{}/{}", worker.worker_group, worker.worker_id)),
            message: e.to_string(),
        });
    }

    /// Run the scanning loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.config.interval.as_secs(), "fleet scanner started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.scan_all(Utc::now()).await {
                        Ok(report) => debug!(
                            pools = report.pools.len(),
                            failed = report.failed.len(),
                            not_scanned = report.not_scanned.len(),
                            "scan finished"
                        ),
                        Err(e) => error!(error = %e, "scan failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("fleet scanner shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as Span;
    use fleetgrid_metrics::RecordingMonitor;
    use async_trait::async_trait;
    use fleetgrid_provision::{
        QueueCounts, StaticProvider, StaticQueue, TestingProvider, WorkerRef,
        record_queue_activity,
    };
    use fleetgrid_state::{LaunchConfigSpec, NULL_PROVIDER, PoolConfig, PoolUpdate};
    use serde_json::json;

    const POOL: &str = "proj/builder";

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    struct Harness {
        store: StateStore,
        queue: Arc<StaticQueue>,
        provider: Arc<TestingProvider>,
        monitor: Arc<RecordingMonitor>,
        scanner: FleetScanner,
    }

    /// Counts from a static map, except for one queue that always errors.
    struct BrokenQueue {
        counts: Arc<StaticQueue>,
        broken: &'static str,
    }

    #[async_trait]
    impl QueueOracle for BrokenQueue {
        async fn task_queue_counts(&self, task_queue_id: &str) -> anyhow::Result<QueueCounts> {
            if task_queue_id == self.broken {
                anyhow::bail!("queue {task_queue_id} is unavailable");
            }
            self.counts.task_queue_counts(task_queue_id).await
        }
    }

    fn harness(config: ScannerConfig) -> Harness {
        harness_with_broken_queue(config, "")
    }

    fn harness_with_broken_queue(config: ScannerConfig, broken: &'static str) -> Harness {
        let store = StateStore::open_in_memory().unwrap();
        let queue = Arc::new(StaticQueue::new());
        let provider = Arc::new(TestingProvider::new("testing"));
        let monitor = Arc::new(RecordingMonitor::new());
        let registry = ProviderRegistry::new()
            .with(provider.clone())
            .with(Arc::new(StaticProvider::new("hardware")));
        let oracle = Arc::new(BrokenQueue {
            counts: queue.clone(),
            broken,
        });
        let scanner = FleetScanner::new(store.clone(), registry, oracle, monitor.clone(), config);
        Harness {
            store,
            queue,
            provider,
            monitor,
            scanner,
        }
    }

    fn pool_config(min: u32, max: u32, lcs: &[&str]) -> PoolConfig {
        let mut config = PoolConfig::with_capacity(min, max);
        config.launch_configs = lcs
            .iter()
            .map(|id| LaunchConfigSpec::new(json!({"region": "r1"})).with_id(*id))
            .collect();
        config
    }

    fn add_pool(h: &Harness, id: &str, provider: &str, config: PoolConfig) {
        h.store
            .create_pool(Pool::new(id, provider, config, "me", now()))
            .unwrap();
    }

    fn add_running(h: &Harness, pool: &str, id: &str, age_mins: i64, lc: &str) {
        let mut worker = Worker::requested(
            pool,
            "r1",
            id,
            "testing",
            1,
            now() - Span::minutes(age_mins),
            now() + Span::days(1),
        )
        .with_launch_config(lc);
        worker.state = WorkerState::Running;
        h.store.create_worker(worker).unwrap();
    }

    async fn scan(h: &Harness, at: DateTime<Utc>) -> PoolScan {
        let pool = h.store.pool(POOL).unwrap().into_inner();
        h.scanner.scan_pool(&pool, at).await.unwrap()
    }

    fn reason(scan: &PoolScan, id: &str) -> VerdictReason {
        scan.verdict(id).map(|v| v.reason).unwrap()
    }

    #[tokio::test]
    async fn oldest_worker_is_over_capacity() {
        let h = harness(ScannerConfig::default());
        add_pool(&h, POOL, "testing", pool_config(0, 1, &["lc1"]));
        add_running(&h, POOL, "older", 20, "lc1");
        add_running(&h, POOL, "newer", 10, "lc1");
        h.queue.set(POOL, 1, 0);

        let result = scan(&h, now()).await;
        assert_eq!(result.target_capacity, 1);
        let older = result.verdict("older").unwrap();
        assert!(older.terminate);
        assert_eq!(older.reason, VerdictReason::OverCapacity);
        let newer = result.verdict("newer").unwrap();
        assert!(!newer.terminate);
        assert_eq!(newer.reason, VerdictReason::Needed);

        // The verdict is stored on the worker.
        let stored = h.store.worker(POOL, "r1", "older").unwrap();
        assert_eq!(stored.provider_state.verdict.as_ref(), Some(older));
        assert_eq!(stored.provider_state.zombie.last_checked, Some(now()));

        let events = h.monitor.named("workers-to-terminate");
        assert_eq!(events.len(), TERMINATING_REASONS.len());
        assert!(events.iter().any(|e| matches!(
            e,
            MonitorEvent::WorkersToTerminate { reason, count: 1, .. } if reason == "over capacity"
        )));
    }

    #[tokio::test]
    async fn archived_launch_config_always_terminates() {
        let h = harness(ScannerConfig::default());
        add_pool(&h, POOL, "testing", pool_config(5, 10, &["lc1", "lc2"]));
        add_running(&h, POOL, "w1", 10, "lc1");
        add_running(&h, POOL, "w2", 5, "lc2");
        h.queue.set(POOL, 100, 0);

        let change = PoolUpdate {
            config: Some(pool_config(5, 10, &["lc2"])),
            ..PoolUpdate::default()
        };
        h.store.update_pool(POOL, &change, now()).unwrap();

        let result = scan(&h, now()).await;
        assert_eq!(reason(&result, "w1"), VerdictReason::LaunchConfigArchived);
        assert_eq!(reason(&result, "w2"), VerdictReason::Needed);
    }

    #[tokio::test]
    async fn lowering_min_capacity_flips_the_next_scan() {
        let h = harness(ScannerConfig::default());
        add_pool(&h, POOL, "testing", pool_config(2, 10, &["lc1"]));
        add_running(&h, POOL, "older", 20, "lc1");
        add_running(&h, POOL, "newer", 10, "lc1");

        let first = scan(&h, now()).await;
        assert_eq!(reason(&first, "older"), VerdictReason::Needed);
        assert_eq!(reason(&first, "newer"), VerdictReason::Needed);

        let change = PoolUpdate {
            config: Some(pool_config(1, 10, &["lc1"])),
            ..PoolUpdate::default()
        };
        h.store.update_pool(POOL, &change, now()).unwrap();

        let second = scan(&h, now() + Span::minutes(1)).await;
        assert_eq!(reason(&second, "older"), VerdictReason::OverCapacity);
        assert_eq!(reason(&second, "newer"), VerdictReason::Needed);

        // And back again once demand returns.
        h.queue.set(POOL, 2, 0);
        let third = scan(&h, now() + Span::minutes(2)).await;
        assert_eq!(reason(&third, "older"), VerdictReason::Needed);
    }

    #[tokio::test]
    async fn gone_workers_are_stopped_and_not_counted() {
        let h = harness(ScannerConfig::default());
        add_pool(&h, POOL, "testing", pool_config(0, 10, &["lc1"]));
        add_running(&h, POOL, "older", 20, "lc1");
        add_running(&h, POOL, "newer", 10, "lc1");
        h.queue.set(POOL, 1, 0);
        h.provider.forget("r1", "newer");

        let result = scan(&h, now()).await;
        assert_eq!(result.stopped, vec!["newer".to_string()]);
        assert_eq!(reason(&result, "older"), VerdictReason::Needed);
        assert!(result.verdict("newer").is_none());
        assert_eq!(
            h.store.worker(POOL, "r1", "newer").unwrap().state,
            WorkerState::Stopped
        );
    }

    #[tokio::test]
    async fn switched_off_pool_retires_everything_left() {
        let h = harness(ScannerConfig::default());
        add_pool(&h, POOL, "testing", pool_config(3, 10, &["lc1"]));
        add_running(&h, POOL, "w1", 10, "lc1");
        h.store
            .update_pool(POOL, &PoolUpdate::provider(NULL_PROVIDER), now())
            .unwrap();

        let report = h.scanner.scan_all(now()).await.unwrap();
        assert_eq!(report.pools.len(), 1);
        assert_eq!(report.pools[0].target_capacity, 0);
        assert_eq!(reason(&report.pools[0], "w1"), VerdictReason::OverCapacity);
    }

    #[tokio::test]
    async fn static_pools_are_skipped_and_deadline_is_reported() {
        let h = harness(ScannerConfig::default());
        add_pool(&h, "proj/static", "hardware", pool_config(0, 1, &[]));
        add_pool(&h, POOL, "testing", pool_config(0, 1, &[]));
        let report = h.scanner.scan_all(now()).await.unwrap();
        assert_eq!(report.skipped, vec!["proj/static".to_string()]);
        assert_eq!(report.pools.len(), 1);

        let h = harness(ScannerConfig {
            scan_deadline: Duration::ZERO,
            ..ScannerConfig::default()
        });
        add_pool(&h, POOL, "testing", pool_config(0, 1, &[]));
        let report = h.scanner.scan_all(now()).await.unwrap();
        assert!(report.pools.is_empty());
        assert_eq!(report.not_scanned, vec![POOL.to_string()]);
    }

    #[tokio::test]
    async fn single_claim_without_reclaim_is_named() {
        let h = harness(ScannerConfig::default());
        add_pool(&h, POOL, "testing", pool_config(0, 10, &["lc1"]));
        add_running(&h, POOL, "claimed-once", 180, "lc1");
        add_running(&h, POOL, "busy", 180, "lc1");
        h.queue.set(POOL, 2, 0);

        let once = WorkerRef::new(POOL, "r1", "claimed-once");
        record_queue_activity(&h.store, once, now() - Span::minutes(170)).unwrap();
        let busy = WorkerRef::new(POOL, "r1", "busy");
        record_queue_activity(&h.store, busy, now() - Span::minutes(170)).unwrap();
        record_queue_activity(&h.store, busy, now() - Span::minutes(5)).unwrap();

        let result = scan(&h, now()).await;
        assert_eq!(reason(&result, "claimed-once"), VerdictReason::NeverReclaimed);
        assert_eq!(reason(&result, "busy"), VerdictReason::Needed);

        // A reclaim long ago is plain inactivity.
        record_queue_activity(&h.store, once, now() - Span::minutes(150)).unwrap();
        let later = scan(&h, now()).await;
        assert_eq!(reason(&later, "claimed-once"), VerdictReason::Inactive);
    }

    #[tokio::test]
    async fn failed_worker_check_is_reported_and_others_are_scanned() {
        let h = harness(ScannerConfig::default());
        add_pool(&h, POOL, "testing", pool_config(0, 10, &["lc1"]));
        add_running(&h, POOL, "w1", 30, "lc1");
        add_running(&h, POOL, "w2", 20, "lc1");
        add_running(&h, POOL, "w3", 10, "lc1");
        h.queue.set(POOL, 3, 0);
        h.provider.fail_check("r1", "w2");

        let result = scan(&h, now()).await;
        assert_eq!(result.worker_failures, 1);
        assert_eq!(result.verdicts.len(), 3);
        assert_eq!(reason(&result, "w1"), VerdictReason::Needed);
        assert_eq!(reason(&result, "w2"), VerdictReason::Needed);
        assert_eq!(reason(&result, "w3"), VerdictReason::Needed);

        let failures = h.monitor.named("scan-failure");
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            &failures[0],
            MonitorEvent::ScanFailure { worker: Some(w), .. } if w == "r1/w2"
        ));
    }

    #[tokio::test]
    async fn failed_pool_does_not_stop_the_sweep() {
        let h = harness_with_broken_queue(ScannerConfig::default(), "proj/broken");
        add_pool(&h, "proj/broken", "testing", pool_config(0, 10, &["lc1"]));
        add_running(&h, "proj/broken", "b1", 10, "lc1");
        add_pool(&h, POOL, "testing", pool_config(0, 10, &["lc1"]));
        add_running(&h, POOL, "w1", 10, "lc1");
        h.queue.set(POOL, 1, 0);

        let report = h.scanner.scan_all(now()).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "proj/broken");
        assert!(report.failed[0].1.contains("unavailable"));
        assert_eq!(report.pools.len(), 1);
        assert_eq!(report.pools[0].worker_pool_id, POOL);
        assert_eq!(reason(&report.pools[0], "w1"), VerdictReason::Needed);

        // The broken pool's worker keeps whatever it had.
        let untouched = h.store.worker("proj/broken", "r1", "b1").unwrap();
        assert!(untouched.provider_state.verdict.is_none());

        let failures = h.monitor.named("scan-failure");
        assert!(failures.iter().any(|e| matches!(
            e,
            MonitorEvent::ScanFailure { worker_pool_id, worker: None, .. } if worker_pool_id == "proj/broken"
        )));
    }
}
