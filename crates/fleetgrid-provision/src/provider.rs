//! Provider drivers and the registry that resolves them by id.
//!
//! A provider knows how to turn a launch config into a running machine.
//! The control loops only ever talk to the [`Provider`] trait; how workers
//! are physically created or destroyed is up to the driver.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value;

use fleetgrid_state::{LaunchConfig, NULL_PROVIDER, Pool, Worker};

/// How a provider's workers come to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Switched-off pools; never creates anything.
    Null,
    /// Workers are started outside fleetgrid and register themselves.
    Static,
    /// Workers are created on demand by the provisioner.
    Dynamic,
}

impl ProviderKind {
    /// Whether the provisioner and scanner manage this provider's pools.
    pub fn is_managed(self) -> bool {
        self == Self::Dynamic
    }
}

/// A machine the provider just asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedWorker {
    pub worker_group: String,
    pub worker_id: String,
    /// Provider-private fields stored on the worker.
    pub extra: BTreeMap<String, Value>,
}

/// What a provider learned when checking on a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCheck {
    /// Nothing new.
    Unchanged,
    /// Still there; merge these provider-private fields.
    Updated(BTreeMap<String, Value>),
    /// The machine no longer exists.
    Gone,
}

/// A cloud (or fake) driver.
#[async_trait]
pub trait Provider: Send + Sync {
    fn provider_id(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Ask for one machine from `launch_config`.
    async fn create_worker(
        &self,
        pool: &Pool,
        launch_config: &LaunchConfig,
    ) -> anyhow::Result<ProvisionedWorker>;

    /// Collect the provider-side state of a live worker.
    async fn check_worker(&self, worker: &Worker) -> anyhow::Result<WorkerCheck>;
}

/// Driver for pools that should not have workers.
#[derive(Debug, Default)]
pub struct NullProvider;

#[async_trait]
impl Provider for NullProvider {
    fn provider_id(&self) -> &str {
        NULL_PROVIDER
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Null
    }

    async fn create_worker(&self, pool: &Pool, _: &LaunchConfig) -> anyhow::Result<ProvisionedWorker> {
        bail!("{} is switched off and cannot create workers", pool.worker_pool_id)
    }

    async fn check_worker(&self, _: &Worker) -> anyhow::Result<WorkerCheck> {
        Ok(WorkerCheck::Unchanged)
    }
}

/// Driver for self-registering, externally managed workers.
#[derive(Debug)]
pub struct StaticProvider {
    provider_id: String,
}

impl StaticProvider {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
        }
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Static
    }

    async fn create_worker(&self, pool: &Pool, _: &LaunchConfig) -> anyhow::Result<ProvisionedWorker> {
        bail!(
            "static provider {} does not create workers for {}",
            self.provider_id,
            pool.worker_pool_id
        )
    }

    async fn check_worker(&self, _: &Worker) -> anyhow::Result<WorkerCheck> {
        Ok(WorkerCheck::Unchanged)
    }
}

/// Providers by id. The null provider is always present.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        providers.insert(NULL_PROVIDER.to_string(), Arc::new(NullProvider));
        Self { providers }
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers
            .insert(provider.provider_id().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.providers.contains_key(provider_id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_always_knows_the_null_provider() {
        let registry = ProviderRegistry::new();
        assert!(registry.contains(NULL_PROVIDER));
        assert_eq!(
            registry.get(NULL_PROVIDER).map(|p| p.kind()),
            Some(ProviderKind::Null)
        );
        assert!(registry.get("aws").is_none());
    }

    #[test]
    fn registered_providers_are_listed() {
        let registry = ProviderRegistry::new().with(Arc::new(StaticProvider::new("hardware")));
        assert_eq!(registry.ids(), vec!["hardware", NULL_PROVIDER]);
        assert!(!ProviderKind::Static.is_managed());
        assert!(ProviderKind::Dynamic.is_managed());
    }
}
