//! fleetgrid.toml configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::duration::HumanDuration;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub provisioner: ProvisionerConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub expiry: ExpiryConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Fixed queue counts, keyed by worker pool id, for deployments
    /// without a live queue.
    #[serde(default)]
    pub queue: BTreeMap<String, QueueCountsConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/fleetgrid"),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub max_update_attempts: u32,
    pub retry_delay: HumanDuration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_update_attempts: 10,
            retry_delay: HumanDuration::from_millis(25),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    pub interval: HumanDuration,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            interval: HumanDuration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub interval: HumanDuration,
    pub pool_timeout: HumanDuration,
    pub scan_deadline: HumanDuration,
    /// Used for pools that set no queue inactivity timeout.
    pub queue_inactivity_timeout: HumanDuration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval: HumanDuration::from_secs(60),
            pool_timeout: HumanDuration::from_secs(30),
            scan_deadline: HumanDuration::from_secs(300),
            queue_inactivity_timeout: HumanDuration::from_secs(7200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    pub interval: HumanDuration,
    pub error_retention: HumanDuration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: HumanDuration::from_secs(3600),
            error_retention: HumanDuration::from_secs(7 * 86_400),
        }
    }
}

/// A provider the daemon should register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKindConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKindConfig {
    /// Self-registering workers started outside fleetgrid.
    Static,
    /// In-memory fake that creates numbered workers.
    Testing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCountsConfig {
    #[serde(default)]
    pub pending: u64,
    #[serde(default)]
    pub claimed: u64,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: FleetConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.max_update_attempts == 0 {
            return Err(ConfigError::Invalid(
                "store.max_update_attempts must be at least 1".into(),
            ));
        }
        for (name, interval) in [
            ("provisioner.interval", self.provisioner.interval),
            ("scanner.interval", self.scanner.interval),
            ("expiry.interval", self.expiry.interval),
        ] {
            if interval.get().is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.id.is_empty() || provider.id == "null-provider" {
                return Err(ConfigError::Invalid(format!(
                    "provider id {:?} is reserved or empty",
                    provider.id
                )));
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "provider {} is configured twice",
                    provider.id
                )));
            }
        }
        Ok(())
    }

    /// Scaffold a fleetgrid.toml for a local run.
    pub fn scaffold(data_dir: &Path) -> Self {
        FleetConfig {
            daemon: DaemonConfig {
                data_dir: data_dir.to_path_buf(),
                ..DaemonConfig::default()
            },
            store: StoreConfig::default(),
            provisioner: ProvisionerConfig::default(),
            scanner: ScannerConfig::default(),
            expiry: ExpiryConfig::default(),
            providers: vec![
                ProviderConfig {
                    id: "static".to_string(),
                    kind: ProviderKindConfig::Static,
                },
                ProviderConfig {
                    id: "testing".to_string(),
                    kind: ProviderKindConfig::Testing,
                },
            ],
            queue: BTreeMap::new(),
        }
    }
}
