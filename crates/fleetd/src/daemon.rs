//! Daemon assembly: one store, one provider registry, every loop.
//!
//! ```text
//! Fleet
//!   ├── StateStore (redb)
//!   ├── ProviderRegistry (null + configured providers)
//!   ├── StaticQueue (counts from fleetgrid.toml)
//!   ├── Fanout(TracingMonitor, MetricsRegistry)
//!   ├── FleetApi
//!   └── loops: Provisioner, FleetScanner, ExpirySweeper, metrics file writer
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use fleetgrid_api::FleetApi;
use fleetgrid_core::{FleetConfig, ProviderKindConfig};
use fleetgrid_metrics::{Fanout, MetricsRegistry, MonitorSink, TracingMonitor, render_prometheus};
use fleetgrid_provision::{
    ExpiryConfig, ExpirySweeper, ProviderRegistry, Provisioner, ProvisionerConfig, StaticProvider,
    StaticQueue, TestingProvider,
};
use fleetgrid_scanner::{FleetScanner, ScannerConfig};
use fleetgrid_state::{StateStore, StoreOptions};

/// File name of the state database inside the data directory.
pub const DB_FILE: &str = "fleetgrid.redb";
/// Prometheus text file rewritten by the metrics loop.
pub const METRICS_FILE: &str = "metrics.prom";

/// Every subsystem of a running daemon.
pub struct Fleet {
    pub store: StateStore,
    pub registry: ProviderRegistry,
    pub queue: Arc<StaticQueue>,
    pub metrics: Arc<MetricsRegistry>,
    pub api: FleetApi,
    pub provisioner: Arc<Provisioner>,
    pub scanner: Arc<FleetScanner>,
    pub expiry: Arc<ExpirySweeper>,
    config: FleetConfig,
}

fn store_options(config: &FleetConfig) -> StoreOptions {
    StoreOptions {
        max_update_attempts: config.store.max_update_attempts,
        retry_delay: config.store.retry_delay.get(),
    }
}

/// The providers named in the configuration, plus the null provider.
pub fn provider_registry(config: &FleetConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for provider in &config.providers {
        match provider.kind {
            ProviderKindConfig::Static => {
                registry.register(Arc::new(StaticProvider::new(&provider.id)))
            }
            ProviderKindConfig::Testing => {
                registry.register(Arc::new(TestingProvider::new(&provider.id)))
            }
        }
    }
    registry
}

impl Fleet {
    /// Open the on-disk store under `daemon.data_dir`.
    pub fn open(config: FleetConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.daemon.data_dir)?;
        let db_path = config.daemon.data_dir.join(DB_FILE);
        let store = StateStore::open_with(&db_path, store_options(&config))?;
        info!(path = ?db_path, "state store opened");
        Ok(Self::assemble(store, config))
    }

    /// Same wiring over an in-memory store.
    pub fn in_memory(config: FleetConfig) -> anyhow::Result<Self> {
        let store = StateStore::open_in_memory_with(store_options(&config))?;
        Ok(Self::assemble(store, config))
    }

    fn assemble(store: StateStore, config: FleetConfig) -> Self {
        let registry = provider_registry(&config);
        info!(providers = ?registry.ids(), "providers registered");

        let queue = Arc::new(StaticQueue::new());
        for (pool, counts) in &config.queue {
            queue.set(pool, counts.pending, counts.claimed);
        }

        let metrics = Arc::new(MetricsRegistry::new());
        let monitor: Arc<dyn MonitorSink> = Arc::new(
            Fanout::new()
                .with(Arc::new(TracingMonitor))
                .with(metrics.clone()),
        );

        let provisioner = Provisioner::new(
            store.clone(),
            registry.clone(),
            queue.clone(),
            monitor.clone(),
            ProvisionerConfig {
                interval: config.provisioner.interval.get(),
                default_queue_inactivity_timeout: config.scanner.queue_inactivity_timeout.get(),
            },
        );
        let scanner = FleetScanner::new(
            store.clone(),
            registry.clone(),
            queue.clone(),
            monitor,
            ScannerConfig {
                interval: config.scanner.interval.get(),
                pool_timeout: config.scanner.pool_timeout.get(),
                scan_deadline: config.scanner.scan_deadline.get(),
                default_queue_inactivity_timeout: config.scanner.queue_inactivity_timeout.get(),
            },
        );
        let retention = chrono::Duration::from_std(config.expiry.error_retention.get())
            .unwrap_or(chrono::Duration::MAX);
        let expiry = ExpirySweeper::new(
            store.clone(),
            ExpiryConfig {
                interval: config.expiry.interval.get(),
                error_retention: retention,
            },
        );

        Self {
            api: FleetApi::new(store.clone(), registry.clone()),
            store,
            registry,
            queue,
            metrics,
            provisioner: Arc::new(provisioner),
            scanner: Arc::new(scanner),
            expiry: Arc::new(expiry),
            config,
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Render the current metrics in Prometheus text format.
    pub fn prometheus(&self) -> String {
        render_prometheus(&self.metrics.snapshot())
    }

    /// Run every loop until `shutdown` flips.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let provisioner = self.provisioner.clone();
        let provisioner_shutdown = shutdown.clone();
        let provisioner_handle = tokio::spawn(async move {
            provisioner.run(provisioner_shutdown).await;
        });

        let scanner = self.scanner.clone();
        let scanner_shutdown = shutdown.clone();
        let scanner_handle = tokio::spawn(async move {
            scanner.run(scanner_shutdown).await;
        });

        let expiry = self.expiry.clone();
        let expiry_shutdown = shutdown.clone();
        let expiry_handle = tokio::spawn(async move {
            expiry.run(expiry_shutdown).await;
        });

        let metrics = self.metrics.clone();
        let metrics_path = self.config.daemon.data_dir.join(METRICS_FILE);
        let metrics_interval = self.config.scanner.interval.get();
        let metrics_handle = tokio::spawn(async move {
            write_metrics_loop(metrics, metrics_path, metrics_interval, shutdown).await;
        });

        let _ = provisioner_handle.await;
        let _ = scanner_handle.await;
        let _ = expiry_handle.await;
        let _ = metrics_handle.await;
        info!("all loops stopped");
        Ok(())
    }
}

/// Write the exposition atomically so a textfile collector never reads a
/// partial file.
pub fn write_metrics_file(metrics: &MetricsRegistry, path: &Path) -> std::io::Result<()> {
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, render_prometheus(&metrics.snapshot()))?;
    std::fs::rename(&tmp, path)
}

async fn write_metrics_loop(
    metrics: Arc<MetricsRegistry>,
    path: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = write_metrics_file(&metrics, &path) {
                    warn!(path = ?path, error = %e, "failed to write metrics file");
                }
            }
            _ = shutdown.changed() => {
                if let Err(e) = write_metrics_file(&metrics, &path) {
                    warn!(path = ?path, error = %e, "failed to write metrics file");
                }
                break;
            }
        }
    }
}
