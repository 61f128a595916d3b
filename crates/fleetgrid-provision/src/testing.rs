//! In-memory provider for tests and local runs.
//!
//! Creates numbered workers in a worker group taken from the launch
//! config's `region` field (or `default`), and can be told to fail for
//! particular launch configs, to fail checks of particular workers, or to
//! forget machines.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::bail;
use async_trait::async_trait;
use serde_json::json;

use fleetgrid_state::{LaunchConfig, Pool, Worker};

use crate::provider::{Provider, ProviderKind, ProvisionedWorker, WorkerCheck};

#[derive(Default)]
struct TestingState {
    failing_launch_configs: HashSet<String>,
    gone: HashSet<(String, String)>,
    failing_checks: HashSet<(String, String)>,
    created: Vec<(String, String)>,
}

/// A dynamic provider that only pretends to create machines.
pub struct TestingProvider {
    provider_id: String,
    next_id: AtomicU64,
    state: Mutex<TestingState>,
}

impl TestingProvider {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            next_id: AtomicU64::new(1),
            state: Mutex::new(TestingState::default()),
        }
    }

    /// Make every creation from this launch config fail.
    pub fn fail_launch_config(&self, launch_config_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state
                .failing_launch_configs
                .insert(launch_config_id.to_string());
        }
    }

    /// Pretend the machine behind a worker disappeared.
    pub fn forget(&self, worker_group: &str, worker_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state
                .gone
                .insert((worker_group.to_string(), worker_id.to_string()));
        }
    }

    /// Make every check of this worker fail.
    pub fn fail_check(&self, worker_group: &str, worker_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state
                .failing_checks
                .insert((worker_group.to_string(), worker_id.to_string()));
        }
    }

    /// (worker group, worker id) of every machine created so far.
    pub fn created(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .map(|state| state.created.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provider for TestingProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Dynamic
    }

    async fn create_worker(
        &self,
        pool: &Pool,
        launch_config: &LaunchConfig,
    ) -> anyhow::Result<ProvisionedWorker> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("testing provider lock poisoned"))?;
        if state
            .failing_launch_configs
            .contains(&launch_config.launch_config_id)
        {
            bail!(
                "launch config {} of {} is configured to fail",
                launch_config.launch_config_id,
                pool.worker_pool_id
            );
        }
        let worker_group = launch_config
            .spec
            .configuration
            .get("region")
            .and_then(|v| v.as_str())
            .unwrap_or("default")
            .to_string();
        let worker_id = format!("w-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        state
            .created
            .push((worker_group.clone(), worker_id.clone()));

        let mut extra = BTreeMap::new();
        extra.insert("machine".to_string(), json!(format!("{}-{worker_id}", self.provider_id)));
        Ok(ProvisionedWorker {
            worker_group,
            worker_id,
            extra,
        })
    }

    async fn check_worker(&self, worker: &Worker) -> anyhow::Result<WorkerCheck> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("testing provider lock poisoned"))?;
        let key = (worker.worker_group.clone(), worker.worker_id.clone());
        if state.failing_checks.contains(&key) {
            bail!(
                "check of {}/{} is configured to fail",
                worker.worker_group,
                worker.worker_id
            );
        }
        if state.gone.contains(&key) {
            Ok(WorkerCheck::Gone)
        } else {
            Ok(WorkerCheck::Unchanged)
        }
    }
}
