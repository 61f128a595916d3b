//! Administrative and worker-facing operations.
//!
//! Every call reads or writes through the `StateStore`; nothing is cached
//! here, so several `FleetApi` instances over one store agree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use fleetgrid_provision::{
    ProviderRegistry, WorkerRef, mark_stopped, mark_stopping, quarantine_worker, register_worker,
};
use fleetgrid_state::{
    LaunchConfig, NULL_PROVIDER, NewPoolError, Page, PageRequest, Pool, PoolConfig, PoolError,
    PoolStats, PoolUpdate, StateStore, Versioned, Worker, WorkerFilter, WorkerState,
};

use crate::error::{ApiError, ApiResult};

/// Largest page a caller may ask for.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Body of a pool create or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolDefinition {
    pub provider_id: String,
    #[serde(default)]
    pub description: String,
    pub config: PoolConfig,
    pub owner: String,
    #[serde(default)]
    pub email_on_error: bool,
}

/// Paging options of list calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub continuation_token: Option<String>,
}

impl ListOptions {
    fn page(&self) -> ApiResult<PageRequest> {
        if let Some(limit) = self.limit
            && (limit == 0 || limit > MAX_PAGE_SIZE)
        {
            return Err(ApiError::Validation(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(PageRequest {
            limit: self.limit,
            continuation: self.continuation_token.clone(),
            prefix: None,
        })
    }
}

/// Answer to "should this worker shut down?".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationAdvice {
    pub terminate: bool,
    pub reason: String,
    pub decided_at: DateTime<Utc>,
}

fn unwrap_page<T>(page: Page<Versioned<T>>) -> Page<T> {
    Page {
        items: page.items.into_iter().map(Versioned::into_inner).collect(),
        continuation: page.continuation,
    }
}

/// In-process API over the fleet state.
#[derive(Clone)]
pub struct FleetApi {
    store: StateStore,
    registry: ProviderRegistry,
    clock: fn() -> DateTime<Utc>,
}

impl FleetApi {
    pub fn new(store: StateStore, registry: ProviderRegistry) -> Self {
        Self {
            store,
            registry,
            clock: Utc::now,
        }
    }

    /// Use `clock` instead of the system time.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn known_provider(&self, provider_id: &str) -> ApiResult<()> {
        if self.registry.contains(provider_id) {
            Ok(())
        } else {
            Err(ApiError::Validation(format!(
                "unknown provider {provider_id}; known providers: {}",
                self.registry.ids().join(", ")
            )))
        }
    }

    fn worker_ref<'a>(pool: &'a str, group: &'a str, id: &'a str) -> WorkerRef<'a> {
        WorkerRef::new(pool, group, id)
    }

    // ── Pools ──────────────────────────────────────────────────────

    pub fn create_pool(&self, worker_pool_id: &str, definition: PoolDefinition) -> ApiResult<Pool> {
        self.known_provider(&definition.provider_id)?;
        let mut pool = Pool::new(
            worker_pool_id,
            definition.provider_id,
            definition.config,
            definition.owner,
            self.now(),
        );
        pool.description = definition.description;
        pool.email_on_error = definition.email_on_error;
        let created = self.store.create_pool(pool)?.into_inner();
        info!(worker_pool_id, provider_id = %created.provider_id, "worker pool created");
        Ok(created)
    }

    /// Replace a pool's definition. A provider change keeps the old provider
    /// in `previous_provider_ids` until its workers are gone.
    pub fn update_pool(&self, worker_pool_id: &str, definition: PoolDefinition) -> ApiResult<Pool> {
        self.known_provider(&definition.provider_id)?;
        let change = PoolUpdate {
            provider_id: Some(definition.provider_id),
            description: Some(definition.description),
            config: Some(definition.config),
            owner: Some(definition.owner),
            email_on_error: Some(definition.email_on_error),
        };
        let updated = self
            .store
            .update_pool(worker_pool_id, &change, self.now())?
            .into_inner();
        info!(worker_pool_id, "worker pool updated");
        Ok(updated)
    }

    /// Switch a pool to the null provider. The expiry sweep removes it once
    /// every previous provider has cleaned up.
    pub fn delete_pool(&self, worker_pool_id: &str) -> ApiResult<Pool> {
        let updated = self
            .store
            .update_pool(worker_pool_id, &PoolUpdate::provider(NULL_PROVIDER), self.now())?
            .into_inner();
        info!(worker_pool_id, "worker pool scheduled for deletion");
        Ok(updated)
    }

    pub fn pool(&self, worker_pool_id: &str) -> ApiResult<Pool> {
        Ok(self.store.pool(worker_pool_id)?.into_inner())
    }

    pub fn list_pools(&self, options: &ListOptions) -> ApiResult<Page<Pool>> {
        Ok(unwrap_page(self.store.list_pools(&options.page()?)?))
    }

    /// Current capacity and error breakdown of a pool.
    pub fn pool_stats(&self, worker_pool_id: &str) -> ApiResult<PoolStats> {
        self.store.pool(worker_pool_id)?;
        Ok(self.store.pool_stats(worker_pool_id, self.now())?)
    }

    pub fn list_launch_configs(
        &self,
        worker_pool_id: &str,
        include_archived: bool,
    ) -> ApiResult<Vec<LaunchConfig>> {
        let configs = if include_archived {
            self.store.launch_configs(worker_pool_id)?
        } else {
            self.store.pool(worker_pool_id)?;
            self.store.active_launch_configs(worker_pool_id)?
        };
        Ok(configs.into_iter().map(Versioned::into_inner).collect())
    }

    // ── Workers ────────────────────────────────────────────────────

    pub fn list_workers(
        &self,
        worker_pool_id: &str,
        filter: &WorkerFilter,
        options: &ListOptions,
    ) -> ApiResult<Page<Worker>> {
        let page = self
            .store
            .list_workers(worker_pool_id, filter, options.page()?, self.now())?;
        Ok(unwrap_page(page))
    }

    pub fn worker(&self, worker_pool_id: &str, worker_group: &str, worker_id: &str) -> ApiResult<Worker> {
        Ok(self
            .store
            .worker(worker_pool_id, worker_group, worker_id)?
            .into_inner())
    }

    /// The scanner's latest verdict. A worker not yet scanned is needed.
    pub fn should_worker_terminate(
        &self,
        worker_pool_id: &str,
        worker_group: &str,
        worker_id: &str,
    ) -> ApiResult<TerminationAdvice> {
        let worker = self.worker(worker_pool_id, worker_group, worker_id)?;
        Ok(match worker.provider_state.verdict {
            Some(verdict) => TerminationAdvice {
                terminate: verdict.terminate,
                reason: verdict.reason.as_str().to_string(),
                decided_at: verdict.decided_at,
            },
            None => TerminationAdvice {
                terminate: false,
                reason: "not yet scanned".to_string(),
                decided_at: worker.created,
            },
        })
    }

    pub fn register_worker(
        &self,
        worker_pool_id: &str,
        worker_group: &str,
        worker_id: &str,
        provider_id: &str,
    ) -> ApiResult<Worker> {
        let worker = Self::worker_ref(worker_pool_id, worker_group, worker_id);
        Ok(register_worker(&self.store, worker, provider_id, self.now())?.into_inner())
    }

    /// Quarantine until `until`, or lift the quarantine with `None`.
    pub fn quarantine_worker(
        &self,
        worker_pool_id: &str,
        worker_group: &str,
        worker_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> ApiResult<Worker> {
        let worker = Self::worker_ref(worker_pool_id, worker_group, worker_id);
        Ok(quarantine_worker(&self.store, worker, until, self.now())?.into_inner())
    }

    pub fn worker_stopping(
        &self,
        worker_pool_id: &str,
        worker_group: &str,
        worker_id: &str,
    ) -> ApiResult<Worker> {
        let worker = Self::worker_ref(worker_pool_id, worker_group, worker_id);
        let current = self.worker(worker_pool_id, worker_group, worker_id)?;
        if current.state == WorkerState::Stopped {
            return Err(ApiError::Conflict(format!(
                "worker {worker_group}/{worker_id} already stopped"
            )));
        }
        Ok(mark_stopping(&self.store, worker, self.now())?.into_inner())
    }

    pub fn worker_stopped(
        &self,
        worker_pool_id: &str,
        worker_group: &str,
        worker_id: &str,
    ) -> ApiResult<Worker> {
        let worker = Self::worker_ref(worker_pool_id, worker_group, worker_id);
        Ok(mark_stopped(&self.store, worker, self.now())?.into_inner())
    }

    // ── Errors ─────────────────────────────────────────────────────

    pub fn report_error(&self, worker_pool_id: &str, error: NewPoolError) -> ApiResult<PoolError> {
        self.store.pool(worker_pool_id)?;
        Ok(self.store.report_error(worker_pool_id, error, self.now())?)
    }

    pub fn list_errors(
        &self,
        worker_pool_id: &str,
        options: &ListOptions,
    ) -> ApiResult<Page<PoolError>> {
        let page = self
            .store
            .list_pool_errors(worker_pool_id, options.page()?)?;
        Ok(unwrap_page(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fleetgrid_provision::{StaticProvider, TestingProvider};
    use fleetgrid_state::LaunchConfigSpec;
    use serde_json::json;
    use std::sync::Arc;

    fn fixed_now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn api() -> FleetApi {
        let store = StateStore::open_in_memory().unwrap();
        let registry = ProviderRegistry::new()
            .with(Arc::new(TestingProvider::new("testing")))
            .with(Arc::new(StaticProvider::new("hardware")));
        FleetApi::new(store, registry).with_clock(fixed_now)
    }

    fn definition(provider: &str, lcs: &[&str]) -> PoolDefinition {
        let mut config = PoolConfig::with_capacity(0, 10);
        config.launch_configs = lcs
            .iter()
            .map(|id| LaunchConfigSpec::new(json!({"region": "r1"})).with_id(*id))
            .collect();
        PoolDefinition {
            provider_id: provider.to_string(),
            description: "builders".to_string(),
            config,
            owner: "team@example.com".to_string(),
            email_on_error: false,
        }
    }

    fn add_worker(api: &FleetApi, id: &str) {
        api.store
            .create_worker(Worker::requested(
                "proj/builder",
                "r1",
                id,
                "testing",
                1,
                fixed_now(),
                fixed_now() + Duration::days(1),
            ))
            .unwrap();
    }

    #[test]
    fn pool_crud_round() {
        let api = api();
        let pool = api
            .create_pool("proj/builder", definition("testing", &["lc1"]))
            .unwrap();
        assert_eq!(pool.provider_id, "testing");

        // Replay is idempotent; a different body conflicts.
        api.create_pool("proj/builder", definition("testing", &["lc1"]))
            .unwrap();
        let err = api
            .create_pool("proj/builder", definition("hardware", &["lc1"]))
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let updated = api
            .update_pool("proj/builder", definition("hardware", &["lc2"]))
            .unwrap();
        assert_eq!(updated.previous_provider_ids, vec!["testing".to_string()]);
        let active = api.list_launch_configs("proj/builder", false).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].launch_config_id, "lc2");
        assert_eq!(api.list_launch_configs("proj/builder", true).unwrap().len(), 2);

        let deleted = api.delete_pool("proj/builder").unwrap();
        assert_eq!(deleted.provider_id, NULL_PROVIDER);
        assert_eq!(api.list_pools(&ListOptions::default()).unwrap().items.len(), 1);
    }

    #[test]
    fn unknown_providers_and_bad_pages_are_input_errors() {
        let api = api();
        let err = api
            .create_pool("proj/builder", definition("aws", &[]))
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let options = ListOptions {
            limit: Some(0),
            continuation_token: None,
        };
        assert!(matches!(
            api.list_pools(&options).unwrap_err(),
            ApiError::Validation(_)
        ));
        assert!(matches!(
            api.pool("proj/missing").unwrap_err(),
            ApiError::NotFound(_)
        ));
    }

    #[test]
    fn pools_page_with_continuation() {
        let api = api();
        for id in ["proj/a", "proj/b", "proj/c"] {
            api.create_pool(id, definition("testing", &[])).unwrap();
        }
        let first = api
            .list_pools(&ListOptions {
                limit: Some(2),
                continuation_token: None,
            })
            .unwrap();
        assert_eq!(first.items.len(), 2);
        let rest = api
            .list_pools(&ListOptions {
                limit: Some(2),
                continuation_token: first.continuation,
            })
            .unwrap();
        assert_eq!(rest.items.len(), 1);
        assert_eq!(rest.items[0].worker_pool_id, "proj/c");
        assert!(rest.continuation.is_none());
    }

    #[test]
    fn worker_lifecycle_through_the_api() {
        let api = api();
        api.create_pool("proj/builder", definition("testing", &[]))
            .unwrap();
        add_worker(&api, "w1");

        let advice = api.should_worker_terminate("proj/builder", "r1", "w1").unwrap();
        assert!(!advice.terminate);

        let running = api
            .register_worker("proj/builder", "r1", "w1", "testing")
            .unwrap();
        assert_eq!(running.state, WorkerState::Running);

        let until = fixed_now() + Duration::hours(1);
        api.quarantine_worker("proj/builder", "r1", "w1", Some(until))
            .unwrap();
        let quarantined = WorkerFilter {
            quarantined: Some(true),
            ..WorkerFilter::default()
        };
        let page = api
            .list_workers("proj/builder", &quarantined, &ListOptions::default())
            .unwrap();
        assert_eq!(page.items.len(), 1);

        api.worker_stopping("proj/builder", "r1", "w1").unwrap();
        let stopped = api.worker_stopped("proj/builder", "r1", "w1").unwrap();
        assert_eq!(stopped.state, WorkerState::Stopped);
        assert!(matches!(
            api.worker_stopping("proj/builder", "r1", "w1").unwrap_err(),
            ApiError::Conflict(_)
        ));
    }

    #[test]
    fn verdicts_are_readable_by_workers() {
        let api = api();
        api.create_pool("proj/builder", definition("testing", &[]))
            .unwrap();
        add_worker(&api, "w1");
        api.store
            .update_worker("proj/builder", "r1", "w1", |w| {
                w.provider_state.verdict = Some(fleetgrid_state::Verdict::new(
                    fleetgrid_state::VerdictReason::OverCapacity,
                    fixed_now(),
                ));
                Ok(())
            })
            .unwrap();
        let advice = api.should_worker_terminate("proj/builder", "r1", "w1").unwrap();
        assert_eq!(
            advice,
            TerminationAdvice {
                terminate: true,
                reason: "over capacity".to_string(),
                decided_at: fixed_now(),
            }
        );
        assert_eq!(
            serde_json::to_value(&advice).unwrap(),
            json!({"terminate": true, "reason": "over capacity", "decidedAt": "2026-03-01T12:00:00Z"})
        );
    }

    #[test]
    fn errors_are_reported_against_existing_pools() {
        let api = api();
        let err = api
            .report_error("proj/builder", NewPoolError::new("boot", "Boot failed", "kernel panic"))
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        api.create_pool("proj/builder", definition("testing", &[]))
            .unwrap();
        api.report_error("proj/builder", NewPoolError::new("boot", "Boot failed", "kernel panic"))
            .unwrap();
        let errors = api
            .list_errors("proj/builder", &ListOptions::default())
            .unwrap();
        assert_eq!(errors.items.len(), 1);
        assert_eq!(errors.items[0].title, "Boot failed");
        assert_eq!(api.pool_stats("proj/builder").unwrap().total_errors, 1);
    }
}
