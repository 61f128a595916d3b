//! fleetgrid-core: daemon configuration.
//!
//! `fleetgrid.toml` is parsed into [`FleetConfig`]; durations are written
//! as `"500ms"`, `"30s"`, `"5m"`, `"2h"` or `"7d"`.

pub mod config;
pub mod duration;
pub mod error;

pub use config::{
    DaemonConfig, ExpiryConfig, FleetConfig, LogFormat, ProviderConfig, ProviderKindConfig,
    ProvisionerConfig, QueueCountsConfig, ScannerConfig, StoreConfig,
};
pub use duration::{HumanDuration, format_duration, parse_duration};
pub use error::ConfigError;
