//! Worker pool and launch config operations.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::record::{Page, PageRequest, Record, Versioned, pool_prefix};
use crate::store::StateStore;
use crate::types::*;

/// Fields an administrator may change on an existing pool. `None` leaves
/// the field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolUpdate {
    pub provider_id: Option<String>,
    pub description: Option<String>,
    pub config: Option<PoolConfig>,
    pub owner: Option<String>,
    pub email_on_error: Option<bool>,
}

impl PoolUpdate {
    pub fn provider(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: Some(provider_id.into()),
            ..Self::default()
        }
    }

    fn apply(&self, pool: &mut Pool) {
        if let Some(provider_id) = &self.provider_id {
            pool.change_provider(provider_id);
        }
        if let Some(description) = &self.description {
            pool.description = description.clone();
        }
        if let Some(config) = &self.config {
            pool.config = config.clone();
        }
        if let Some(owner) = &self.owner {
            pool.owner = owner.clone();
        }
        if let Some(email_on_error) = self.email_on_error {
            pool.email_on_error = email_on_error;
        }
    }
}

type DesiredConfigs = BTreeMap<String, LaunchConfigSpec>;
type StoredConfigs = BTreeMap<String, Versioned<LaunchConfig>>;

/// Reject pool configs that name the same launch config twice.
fn resolve_launch_configs(pool: &Pool) -> StateResult<DesiredConfigs> {
    let mut resolved = BTreeMap::new();
    for spec in &pool.config.launch_configs {
        let id = spec.resolved_id();
        if resolved.insert(id.clone(), spec.clone()).is_some() {
            return Err(StateError::conflict(
                LaunchConfig::KIND,
                format!("{}/{id}", pool.worker_pool_id),
                "listed more than once in the pool configuration",
            ));
        }
    }
    Ok(resolved)
}

impl StateStore {
    // ── Pools ──────────────────────────────────────────────────────

    /// Create a pool and its launch configs. Replays of an identical create succeed.
    pub fn create_pool(&self, pool: Pool) -> StateResult<Versioned<Pool>> {
        self.check_launch_configs(&pool)?;
        let now = pool.last_modified;
        let created = self.create(pool)?;
        self.sync_launch_configs(&created.record, now)?;
        info!(worker_pool_id = %created.worker_pool_id, provider_id = %created.provider_id, "worker pool created");
        Ok(created)
    }

    pub fn pool(&self, worker_pool_id: &str) -> StateResult<Versioned<Pool>> {
        self.get(worker_pool_id)
    }

    pub fn list_pools(&self, page: &PageRequest) -> StateResult<Page<Versioned<Pool>>> {
        self.list(page, |_| true)
    }

    /// Apply an administrative change.
    ///
    /// Switching provider remembers the old one in `previous_provider_ids`
    /// until its workers are gone. Launch configs are re-synchronised with
    /// the resulting configuration. A launch config conflict rejects the
    /// whole change and leaves the pool as it was.
    pub fn update_pool(
        &self,
        worker_pool_id: &str,
        change: &PoolUpdate,
        now: DateTime<Utc>,
    ) -> StateResult<Versioned<Pool>> {
        if let Some(config) = &change.config {
            config.validate()?;
        }
        let updated = self.update(worker_pool_id, |pool: &mut Pool| {
            let before = pool.clone();
            change.apply(pool);
            self.check_launch_configs(pool)?;
            if *pool != before {
                pool.last_modified = now;
            }
            Ok(())
        })?;
        self.sync_launch_configs(&updated.record, now)?;
        Ok(updated)
    }

    /// Forget a previous provider once it owns no live workers.
    pub fn remove_previous_provider_id(
        &self,
        worker_pool_id: &str,
        provider_id: &str,
    ) -> StateResult<Versioned<Pool>> {
        self.update(worker_pool_id, |pool: &mut Pool| {
            pool.previous_provider_ids.retain(|p| p != provider_id);
            Ok(())
        })
    }

    /// Delete pools that are switched off and owe no provider cleanup.
    ///
    /// Their launch configs are archived so the launch config expiry can
    /// remove them once no worker refers to them. Returns the deleted ids.
    pub fn expire_pools(&self, now: DateTime<Utc>) -> StateResult<Vec<String>> {
        let candidates = self.list_all::<Pool, _>("", |pool| {
            pool.is_null_provider() && pool.previous_provider_ids.is_empty()
        })?;
        let mut expired = Vec::new();
        for pool in candidates {
            for config in self.active_launch_configs(&pool.worker_pool_id)? {
                self.archive_launch_config(&config.record, now)?;
            }
            if self.delete_versioned::<Pool>(&pool.worker_pool_id, &pool.etag)? {
                debug!(worker_pool_id = %pool.worker_pool_id, "worker pool expired");
                expired.push(pool.record.worker_pool_id);
            }
        }
        Ok(expired)
    }

    // ── Launch configs ─────────────────────────────────────────────

    /// Bring the stored launch configs of `pool` in line with its configuration.
    ///
    /// New entries are created, entries no longer listed are archived, and
    /// archived entries listed again with the same payload are restored.
    /// Returns the active launch configs.
    pub fn sync_launch_configs(
        &self,
        pool: &Pool,
        now: DateTime<Utc>,
    ) -> StateResult<Vec<LaunchConfig>> {
        let (desired, existing) = self.check_launch_configs(pool)?;

        let mut active = Vec::with_capacity(desired.len());
        for (id, spec) in &desired {
            match existing.get(id) {
                Some(stored) if stored.is_archived => {
                    let restored = self.update(&stored.key(), |lc: &mut LaunchConfig| {
                        lc.is_archived = false;
                        lc.last_modified = now;
                        Ok(())
                    })?;
                    debug!(launch_config_id = %id, "launch config restored");
                    active.push(restored.into_inner());
                }
                Some(stored) => active.push(stored.record.clone()),
                None => {
                    let created = self.create(LaunchConfig::new(
                        &pool.worker_pool_id,
                        spec.clone(),
                        now,
                    ))?;
                    debug!(launch_config_id = %id, "launch config created");
                    active.push(created.into_inner());
                }
            }
        }

        for (id, stored) in &existing {
            if !desired.contains_key(id) && !stored.is_archived {
                self.archive_launch_config(&stored.record, now)?;
            }
        }
        Ok(active)
    }

    /// Resolve the launch configs `pool` lists against the stored ones.
    ///
    /// Fails with `Conflict` on a duplicate id or on an id already stored
    /// with a different payload. Reads only.
    fn check_launch_configs(&self, pool: &Pool) -> StateResult<(DesiredConfigs, StoredConfigs)> {
        let desired = resolve_launch_configs(pool)?;
        let existing: StoredConfigs = self
            .list_all::<LaunchConfig, _>(&pool_prefix(&pool.worker_pool_id), |_| true)?
            .into_iter()
            .map(|lc| (lc.launch_config_id.clone(), lc))
            .collect();
        for (id, spec) in &desired {
            if let Some(stored) = existing.get(id)
                && !stored.spec.same_payload(spec)
            {
                return Err(StateError::conflict(
                    LaunchConfig::KIND,
                    stored.key(),
                    "an existing launch config with this id has a different payload",
                ));
            }
        }
        Ok((desired, existing))
    }

    fn archive_launch_config(&self, config: &LaunchConfig, now: DateTime<Utc>) -> StateResult<()> {
        self.update(&config.key(), |lc: &mut LaunchConfig| {
            if !lc.is_archived {
                lc.is_archived = true;
                lc.last_modified = now;
            }
            Ok(())
        })?;
        debug!(launch_config_id = %config.launch_config_id, "launch config archived");
        Ok(())
    }

    pub fn launch_config(
        &self,
        worker_pool_id: &str,
        launch_config_id: &str,
    ) -> StateResult<Versioned<LaunchConfig>> {
        self.get(&format!("{worker_pool_id}/{launch_config_id}"))
    }

    /// Launch configs of a pool, archived ones included.
    pub fn launch_configs(&self, worker_pool_id: &str) -> StateResult<Vec<Versioned<LaunchConfig>>> {
        self.list_all(&pool_prefix(worker_pool_id), |_| true)
    }

    /// Non-archived launch configs of a pool, in id order.
    pub fn active_launch_configs(
        &self,
        worker_pool_id: &str,
    ) -> StateResult<Vec<Versioned<LaunchConfig>>> {
        self.list_all(&pool_prefix(worker_pool_id), |lc: &LaunchConfig| {
            !lc.is_archived
        })
    }

    /// Delete archived launch configs that no worker refers to any more.
    pub fn expire_launch_configs(&self) -> StateResult<Vec<String>> {
        let archived = self.list_all::<LaunchConfig, _>("", |lc| lc.is_archived)?;
        if archived.is_empty() {
            return Ok(Vec::new());
        }
        let referenced: HashSet<(String, String)> = self
            .list_all::<Worker, _>("", |w| w.launch_config_id.is_some())?
            .into_iter()
            .filter_map(|w| {
                let w = w.into_inner();
                w.launch_config_id.map(|lc| (w.worker_pool_id, lc))
            })
            .collect();

        let mut expired = Vec::new();
        for config in archived {
            let reference = (
                config.worker_pool_id.clone(),
                config.launch_config_id.clone(),
            );
            if referenced.contains(&reference) {
                continue;
            }
            let key = config.key();
            if self.delete_versioned::<LaunchConfig>(&key, &config.etag)? {
                debug!(%key, "launch config expired");
                expired.push(key);
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn spec(id: &str, region: &str) -> LaunchConfigSpec {
        LaunchConfigSpec::new(json!({ "region": region })).with_id(id)
    }

    fn test_pool(configs: Vec<LaunchConfigSpec>) -> Pool {
        let mut config = PoolConfig::with_capacity(0, 10);
        config.launch_configs = configs;
        Pool::new("proj/builder", "aws", config, "ops@example.com", now())
    }

    fn active_ids(store: &StateStore) -> Vec<String> {
        store
            .active_launch_configs("proj/builder")
            .unwrap()
            .into_iter()
            .map(|lc| lc.record.launch_config_id)
            .collect()
    }

    #[test]
    fn create_pool_creates_launch_configs() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .create_pool(test_pool(vec![spec("lc1", "a"), spec("lc2", "b")]))
            .unwrap();
        assert_eq!(active_ids(&store), vec!["lc1", "lc2"]);
    }

    #[test]
    fn duplicate_launch_config_ids_conflict() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .create_pool(test_pool(vec![spec("lc1", "a"), spec("lc1", "b")]))
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict { .. }));
    }

    #[test]
    fn replayed_pool_create_is_idempotent() {
        let store = StateStore::open_in_memory().unwrap();
        let first = store.create_pool(test_pool(vec![spec("lc1", "a")])).unwrap();
        let second = store.create_pool(test_pool(vec![spec("lc1", "a")])).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn config_change_archives_and_restores() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .create_pool(test_pool(vec![spec("lc1", "a"), spec("lc2", "b")]))
            .unwrap();

        let mut config = PoolConfig::with_capacity(0, 10);
        config.launch_configs = vec![spec("lc2", "b")];
        let change = PoolUpdate {
            config: Some(config.clone()),
            ..PoolUpdate::default()
        };
        store.update_pool("proj/builder", &change, now()).unwrap();
        assert_eq!(active_ids(&store), vec!["lc2"]);
        assert!(store.launch_config("proj/builder", "lc1").unwrap().is_archived);

        config.launch_configs = vec![spec("lc1", "a"), spec("lc2", "b")];
        let change = PoolUpdate {
            config: Some(config),
            ..PoolUpdate::default()
        };
        store.update_pool("proj/builder", &change, now()).unwrap();
        assert_eq!(active_ids(&store), vec!["lc1", "lc2"]);
    }

    #[test]
    fn reusing_an_id_with_a_new_payload_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_pool(test_pool(vec![spec("lc1", "a")])).unwrap();

        let mut config = PoolConfig::with_capacity(0, 10);
        config.launch_configs = vec![spec("lc1", "elsewhere")];
        let change = PoolUpdate {
            config: Some(config),
            ..PoolUpdate::default()
        };
        let err = store.update_pool("proj/builder", &change, now()).unwrap_err();
        assert!(matches!(err, StateError::Conflict { .. }));
    }

    #[test]
    fn conflicting_update_leaves_pool_untouched() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_pool(test_pool(vec![spec("lc1", "a")])).unwrap();

        let mut config = PoolConfig::with_capacity(0, 99);
        config.launch_configs = vec![spec("lc1", "elsewhere")];
        let change = PoolUpdate {
            config: Some(config),
            ..PoolUpdate::default()
        };
        let later = now() + chrono::Duration::minutes(1);
        assert!(store.update_pool("proj/builder", &change, later).is_err());

        let pool = store.pool("proj/builder").unwrap();
        assert_eq!(pool.config.max_capacity, 10);
        assert_eq!(pool.config.launch_configs, vec![spec("lc1", "a")]);
        assert_eq!(pool.last_modified, now());

        // The pool still accepts unrelated changes.
        let owner = PoolUpdate {
            owner: Some("new@example.com".to_string()),
            ..PoolUpdate::default()
        };
        let updated = store.update_pool("proj/builder", &owner, later).unwrap();
        assert_eq!(updated.owner, "new@example.com");
        store
            .update_pool("proj/builder", &PoolUpdate::provider(NULL_PROVIDER), later)
            .unwrap();
    }

    #[test]
    fn recreating_over_a_referenced_archived_config_conflicts_cleanly() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_pool(test_pool(vec![spec("lc1", "a")])).unwrap();
        store
            .update_pool("proj/builder", &PoolUpdate::provider(NULL_PROVIDER), now())
            .unwrap();
        store
            .remove_previous_provider_id("proj/builder", "aws")
            .unwrap();
        let worker = Worker::requested(
            "proj/builder",
            "g",
            "w1",
            "aws",
            1,
            now(),
            now() + chrono::Duration::days(1),
        )
        .with_launch_config("lc1");
        store.create(worker).unwrap();
        store.expire_pools(now()).unwrap();
        assert!(store.launch_config("proj/builder", "lc1").unwrap().is_archived);

        let err = store
            .create_pool(test_pool(vec![spec("lc1", "elsewhere")]))
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict { .. }));
        assert!(store.find::<Pool>("proj/builder").unwrap().is_none());
    }

    #[test]
    fn provider_switch_records_previous_provider() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_pool(test_pool(vec![])).unwrap();

        let later = now() + chrono::Duration::minutes(5);
        let updated = store
            .update_pool("proj/builder", &PoolUpdate::provider("gcp"), later)
            .unwrap();
        assert_eq!(updated.provider_id, "gcp");
        assert_eq!(updated.previous_provider_ids, vec!["aws".to_string()]);
        assert_eq!(updated.last_modified, later);

        let cleaned = store
            .remove_previous_provider_id("proj/builder", "aws")
            .unwrap();
        assert!(cleaned.previous_provider_ids.is_empty());
    }

    #[test]
    fn switched_off_pools_expire_once_cleaned_up() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_pool(test_pool(vec![spec("lc1", "a")])).unwrap();
        store
            .update_pool("proj/builder", &PoolUpdate::provider(NULL_PROVIDER), now())
            .unwrap();

        // Still owes cleanup to "aws".
        assert!(store.expire_pools(now()).unwrap().is_empty());

        store
            .remove_previous_provider_id("proj/builder", "aws")
            .unwrap();
        assert_eq!(store.expire_pools(now()).unwrap(), vec!["proj/builder"]);
        assert!(store.find::<Pool>("proj/builder").unwrap().is_none());
        assert!(store.launch_config("proj/builder", "lc1").unwrap().is_archived);
    }

    #[test]
    fn archived_launch_configs_expire_when_unreferenced() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .create_pool(test_pool(vec![spec("lc1", "a"), spec("lc2", "b")]))
            .unwrap();
        let worker = Worker::requested(
            "proj/builder",
            "g",
            "w1",
            "aws",
            1,
            now(),
            now() + chrono::Duration::days(1),
        )
        .with_launch_config("lc1");
        store.create(worker).unwrap();

        let change = PoolUpdate {
            config: Some(PoolConfig::with_capacity(0, 10)),
            ..PoolUpdate::default()
        };
        store.update_pool("proj/builder", &change, now()).unwrap();

        assert_eq!(
            store.expire_launch_configs().unwrap(),
            vec!["proj/builder/lc2"]
        );
        store.delete::<Worker>("proj/builder/g/w1").unwrap();
        assert_eq!(
            store.expire_launch_configs().unwrap(),
            vec!["proj/builder/lc1"]
        );
    }
}
