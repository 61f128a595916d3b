//! fleetgrid-provision: everything that makes workers exist or go away.
//!
//! - [`provider`]: the driver trait, the built-in null and static drivers,
//!   and the registry that resolves a pool's `provider_id`.
//! - [`queue`]: the pending/claimed task count oracle.
//! - [`provisioner`]: the loop that requests new capacity.
//! - [`lifecycle`]: registration, queue activity, quarantine and shutdown.
//! - [`expiry`]: removal of expired workers, launch configs, pools and errors.
//! - [`testing`]: an in-memory dynamic provider.

pub mod expiry;
pub mod lifecycle;
pub mod provider;
pub mod provisioner;
pub mod queue;
pub mod testing;

pub use expiry::{ExpiryConfig, ExpiryReport, ExpirySweeper};
pub use lifecycle::{
    WorkerRef, mark_stopped, mark_stopping, quarantine_worker, record_queue_activity,
    register_worker,
};
pub use provider::{
    NullProvider, Provider, ProviderKind, ProviderRegistry, ProvisionedWorker, StaticProvider,
    WorkerCheck,
};
pub use provisioner::{
    CREATION_ERROR_KIND, PoolProvisioning, ProvisionReport, Provisioner, ProvisionerConfig,
};
pub use queue::{QueueCounts, QueueOracle, StaticQueue};
pub use testing::TestingProvider;
