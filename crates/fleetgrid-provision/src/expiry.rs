//! Periodic expiry of rows nothing needs any more.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info};

use fleetgrid_state::{DEFAULT_ERROR_RETENTION_DAYS, StateResult, StateStore};

/// Knobs of the expiry sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryConfig {
    pub interval: Duration,
    /// How long pool errors are kept.
    pub error_retention: chrono::Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            error_retention: chrono::Duration::days(DEFAULT_ERROR_RETENTION_DAYS),
        }
    }
}

/// What one sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub workers: u32,
    pub launch_configs: Vec<String>,
    pub pools: Vec<String>,
    pub pool_errors: u32,
}

impl ExpiryReport {
    pub fn is_empty(&self) -> bool {
        self.workers == 0
            && self.launch_configs.is_empty()
            && self.pools.is_empty()
            && self.pool_errors == 0
    }
}

/// Deletes expired workers, pools, launch configs and pool errors.
pub struct ExpirySweeper {
    store: StateStore,
    config: ExpiryConfig,
}

impl ExpirySweeper {
    pub fn new(store: StateStore, config: ExpiryConfig) -> Self {
        Self { store, config }
    }

    /// Workers go first so that archived launch configs they pinned can
    /// be dropped in the same sweep.
    pub fn sweep(&self, now: DateTime<Utc>) -> StateResult<ExpiryReport> {
        let workers = self.store.expire_workers(now)?;
        let pools = self.store.expire_pools(now)?;
        let launch_configs = self.store.expire_launch_configs()?;
        let cutoff = now
            .checked_sub_signed(self.config.error_retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let pool_errors = self.store.expire_pool_errors(cutoff)?;
        Ok(ExpiryReport {
            workers,
            launch_configs,
            pools,
            pool_errors,
        })
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.config.interval.as_secs(), "expiry sweeper started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.sweep(Utc::now()) {
                        Ok(report) if !report.is_empty() => info!(
                            workers = report.workers,
                            launch_configs = report.launch_configs.len(),
                            pools = report.pools.len(),
                            pool_errors = report.pool_errors,
                            "expired rows removed"
                        ),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "expiry sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("expiry sweeper shutting down");
                    break;
                }
            }
        }
    }
}
