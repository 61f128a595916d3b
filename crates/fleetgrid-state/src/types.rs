//! Domain types for the fleetgrid state store.
//!
//! These types represent the persisted state of worker pools, their launch
//! configs, workers and pool errors. All types are serializable to/from
//! JSON for storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::error::{StateError, StateResult};

/// Identifier of a worker pool: `{provisioner_id}/{worker_type}`.
pub type WorkerPoolId = String;

/// Provider id of a pool that should no longer have workers.
pub const NULL_PROVIDER: &str = "null-provider";

/// Smallest queue inactivity timeout a pool may configure.
pub const MIN_QUEUE_INACTIVITY_TIMEOUT_SECS: u64 = 20 * 60;

/// Default re-registration window for running workers.
pub const DEFAULT_REREGISTRATION_TIMEOUT_SECS: u64 = 4 * 24 * 60 * 60;

const MAX_IDENTIFIER_LEN: usize = 38;
const MAX_LAUNCH_CONFIG_ID_LEN: usize = 64;

/// Check that `value` is a non-empty `[A-Za-z0-9_-]` identifier.
pub fn validate_identifier(label: &str, value: &str, max_len: usize) -> StateResult<()> {
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if value.is_empty() || value.len() > max_len || !valid_chars {
        return Err(StateError::Validation(format!(
            "{label} {value:?} must be 1-{max_len} characters of [A-Za-z0-9_-]"
        )));
    }
    Ok(())
}

/// Split and validate a `{provisioner_id}/{worker_type}` pool id.
pub fn split_worker_pool_id(worker_pool_id: &str) -> StateResult<(&str, &str)> {
    let (provisioner_id, worker_type) = worker_pool_id.split_once('/').ok_or_else(|| {
        StateError::Validation(format!(
            "worker pool id {worker_pool_id:?} must look like provisionerId/workerType"
        ))
    })?;
    validate_identifier("provisionerId", provisioner_id, MAX_IDENTIFIER_LEN)?;
    validate_identifier("workerType", worker_type, MAX_IDENTIFIER_LEN)?;
    Ok((provisioner_id, worker_type))
}

// ── Pool ──────────────────────────────────────────────────────────

/// A named group of workers sharing a provider and a scaling policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pool {
    pub worker_pool_id: WorkerPoolId,
    /// Current driver, or [`NULL_PROVIDER`].
    pub provider_id: String,
    /// Drivers that may still own workers in this pool.
    #[serde(default)]
    pub previous_provider_ids: Vec<String>,
    #[serde(default)]
    pub description: String,
    pub config: PoolConfig,
    pub owner: String,
    #[serde(default)]
    pub email_on_error: bool,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Pool {
    /// Build a fresh pool record.
    pub fn new(
        worker_pool_id: impl Into<String>,
        provider_id: impl Into<String>,
        config: PoolConfig,
        owner: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            worker_pool_id: worker_pool_id.into(),
            provider_id: provider_id.into(),
            previous_provider_ids: Vec::new(),
            description: String::new(),
            config,
            owner: owner.into(),
            email_on_error: false,
            created: now,
            last_modified: now,
        }
    }

    /// Whether this pool has been switched off.
    pub fn is_null_provider(&self) -> bool {
        self.provider_id == NULL_PROVIDER
    }

    /// Switch the pool to a new provider, remembering the old one for cleanup.
    pub fn change_provider(&mut self, provider_id: &str) {
        if self.provider_id == provider_id {
            return;
        }
        let previous = std::mem::replace(&mut self.provider_id, provider_id.to_string());
        self.previous_provider_ids
            .retain(|p| p != provider_id && *p != previous);
        self.previous_provider_ids.push(previous);
    }

    pub fn validate(&self) -> StateResult<()> {
        split_worker_pool_id(&self.worker_pool_id)?;
        if self.provider_id.is_empty() {
            return Err(StateError::Validation("providerId must not be empty".into()));
        }
        self.config.validate()
    }
}

/// Scaling policy of a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    pub min_capacity: u32,
    pub max_capacity: u32,
    /// Fraction of pending tasks that should get new capacity.
    #[serde(default = "default_scaling_ratio")]
    pub scaling_ratio: f64,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub launch_configs: Vec<LaunchConfigSpec>,
}

fn default_scaling_ratio() -> f64 {
    1.0
}

impl PoolConfig {
    /// A config with the given bounds, a scaling ratio of 1 and no launch configs.
    pub fn with_capacity(min_capacity: u32, max_capacity: u32) -> Self {
        Self {
            min_capacity,
            max_capacity,
            scaling_ratio: default_scaling_ratio(),
            lifecycle: Lifecycle::default(),
            launch_configs: Vec::new(),
        }
    }

    pub fn validate(&self) -> StateResult<()> {
        if self.min_capacity > self.max_capacity {
            return Err(StateError::Validation(format!(
                "minCapacity {} exceeds maxCapacity {}",
                self.min_capacity, self.max_capacity
            )));
        }
        if !self.scaling_ratio.is_finite() || !(0.0..=1.0).contains(&self.scaling_ratio) {
            return Err(StateError::Validation(format!(
                "scalingRatio {} must be between 0 and 1",
                self.scaling_ratio
            )));
        }
        self.lifecycle.validate()?;
        for spec in &self.launch_configs {
            spec.validate()?;
        }
        Ok(())
    }
}

/// Worker lifecycle timeouts of a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lifecycle {
    /// Seconds a requested worker has to register before it is retired.
    #[serde(default)]
    pub registration_timeout_secs: Option<u64>,
    /// Seconds a running worker's registration stays valid.
    #[serde(default = "default_reregistration_timeout")]
    pub reregistration_timeout_secs: u64,
    /// Seconds without queue activity before a worker counts as a zombie.
    /// The scanner's default applies when unset.
    #[serde(default)]
    pub queue_inactivity_timeout_secs: Option<u64>,
}

fn default_reregistration_timeout() -> u64 {
    DEFAULT_REREGISTRATION_TIMEOUT_SECS
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            registration_timeout_secs: None,
            reregistration_timeout_secs: DEFAULT_REREGISTRATION_TIMEOUT_SECS,
            queue_inactivity_timeout_secs: None,
        }
    }
}

impl Lifecycle {
    pub fn validate(&self) -> StateResult<()> {
        if let Some(timeout) = self.queue_inactivity_timeout_secs
            && timeout < MIN_QUEUE_INACTIVITY_TIMEOUT_SECS
        {
            return Err(StateError::Validation(format!(
                "queueInactivityTimeout {timeout}s is below the {MIN_QUEUE_INACTIVITY_TIMEOUT_SECS}s minimum"
            )));
        }
        if self.reregistration_timeout_secs == 0 {
            return Err(StateError::Validation(
                "reregistrationTimeout must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Effective queue inactivity timeout, falling back to `default`.
    pub fn queue_inactivity_timeout(&self, default: Duration) -> Duration {
        self.queue_inactivity_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    pub fn reregistration_timeout(&self) -> Duration {
        Duration::from_secs(self.reregistration_timeout_secs)
    }
}

// ── Launch config ─────────────────────────────────────────────────

/// One launch config entry of a pool's configuration.
///
/// `configuration` is the provider-specific template and is opaque here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchConfigSpec {
    #[serde(default)]
    pub launch_config_id: Option<String>,
    #[serde(default = "default_initial_weight")]
    pub initial_weight: f64,
    /// Per-config cap; the pool's `max_capacity` applies when unset.
    #[serde(default)]
    pub max_capacity: Option<u32>,
    #[serde(default = "default_capacity_per_instance")]
    pub capacity_per_instance: u32,
    #[serde(default)]
    pub configuration: Value,
}

fn default_initial_weight() -> f64 {
    1.0
}

fn default_capacity_per_instance() -> u32 {
    1
}

impl LaunchConfigSpec {
    /// A spec with default weight and capacity around an opaque payload.
    pub fn new(configuration: Value) -> Self {
        Self {
            launch_config_id: None,
            initial_weight: default_initial_weight(),
            max_capacity: None,
            capacity_per_instance: default_capacity_per_instance(),
            configuration,
        }
    }

    pub fn with_id(mut self, launch_config_id: impl Into<String>) -> Self {
        self.launch_config_id = Some(launch_config_id.into());
        self
    }

    pub fn validate(&self) -> StateResult<()> {
        if let Some(id) = &self.launch_config_id {
            validate_identifier("launchConfigId", id, MAX_LAUNCH_CONFIG_ID_LEN)?;
        }
        if !self.initial_weight.is_finite() {
            return Err(StateError::Validation("initialWeight must be finite".into()));
        }
        Ok(())
    }

    /// The explicit id, or one derived from the payload digest.
    pub fn resolved_id(&self) -> String {
        if let Some(id) = &self.launch_config_id {
            return id.clone();
        }
        let canonical = json!({
            "initial_weight": self.initial_weight,
            "max_capacity": self.max_capacity,
            "capacity_per_instance": self.capacity_per_instance,
            "configuration": self.configuration,
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        format!("lc-{}", &hex::encode(digest)[..20])
    }

    /// Same payload, ignoring how the id was supplied.
    pub fn same_payload(&self, other: &LaunchConfigSpec) -> bool {
        self.initial_weight == other.initial_weight
            && self.max_capacity == other.max_capacity
            && self.capacity_per_instance == other.capacity_per_instance
            && self.configuration == other.configuration
    }
}

/// A launch config as stored for one pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchConfig {
    pub worker_pool_id: WorkerPoolId,
    pub launch_config_id: String,
    pub spec: LaunchConfigSpec,
    #[serde(default)]
    pub is_archived: bool,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl LaunchConfig {
    pub fn new(worker_pool_id: &str, spec: LaunchConfigSpec, now: DateTime<Utc>) -> Self {
        let launch_config_id = spec.resolved_id();
        let mut spec = spec;
        spec.launch_config_id = Some(launch_config_id.clone());
        Self {
            worker_pool_id: worker_pool_id.to_string(),
            launch_config_id,
            spec,
            is_archived: false,
            created: now,
            last_modified: now,
        }
    }

    pub fn capacity_per_instance(&self) -> u32 {
        self.spec.capacity_per_instance.max(1)
    }

    /// The cap on capacity coming from this config.
    pub fn capacity_cap(&self, pool_max_capacity: u32) -> u32 {
        self.spec.max_capacity.unwrap_or(pool_max_capacity)
    }
}

// ── Worker ────────────────────────────────────────────────────────

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Requested,
    Running,
    Stopping,
    Stopped,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    /// Everything but `Stopped`.
    pub fn is_live(self) -> bool {
        self != Self::Stopped
    }

    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Requested, Running)
                | (Requested, Stopping)
                | (Running, Stopping)
                | (Requested | Running | Stopping, Stopped)
        ) || self == next && self != Stopped
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single ephemeral worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub worker_pool_id: WorkerPoolId,
    pub worker_group: String,
    pub worker_id: String,
    pub provider_id: String,
    pub state: WorkerState,
    pub capacity: u32,
    #[serde(default)]
    pub launch_config_id: Option<String>,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub quarantine_until: Option<DateTime<Utc>>,
    /// First time the worker claimed a task.
    #[serde(default)]
    pub first_claim: Option<DateTime<Utc>>,
    /// Last time the queue saw the worker doing work.
    #[serde(default)]
    pub last_date_active: Option<DateTime<Utc>>,
    #[serde(default)]
    pub provider_state: ProviderState,
}

impl Worker {
    /// A worker that a provisioning decision just asked for.
    pub fn requested(
        worker_pool_id: &str,
        worker_group: &str,
        worker_id: &str,
        provider_id: &str,
        capacity: u32,
        now: DateTime<Utc>,
        expires: DateTime<Utc>,
    ) -> Self {
        Self {
            worker_pool_id: worker_pool_id.to_string(),
            worker_group: worker_group.to_string(),
            worker_id: worker_id.to_string(),
            provider_id: provider_id.to_string(),
            state: WorkerState::Requested,
            capacity,
            launch_config_id: None,
            created: now,
            last_modified: now,
            last_checked: now,
            expires,
            quarantine_until: None,
            first_claim: None,
            last_date_active: None,
            provider_state: ProviderState::default(),
        }
    }

    pub fn with_launch_config(mut self, launch_config_id: impl Into<String>) -> Self {
        self.launch_config_id = Some(launch_config_id.into());
        self
    }

    pub fn is_quarantined(&self, now: DateTime<Utc>) -> bool {
        self.quarantine_until.is_some_and(|until| until > now)
    }

    /// Move to `next`, refusing transitions out of `Stopped` or backwards.
    pub fn transition(&mut self, next: WorkerState) -> StateResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(StateError::Validation(format!(
                "worker {}/{} cannot move from {} to {}",
                self.worker_group, self.worker_id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub fn validate(&self) -> StateResult<()> {
        split_worker_pool_id(&self.worker_pool_id)?;
        validate_identifier("workerGroup", &self.worker_group, MAX_IDENTIFIER_LEN)?;
        validate_identifier("workerId", &self.worker_id, MAX_IDENTIFIER_LEN)?;
        Ok(())
    }
}

/// Per-worker state owned by the control loops and providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProviderState {
    /// The scanner's latest decision.
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub zombie: ZombieMarkers,
    /// Provider-private fields. A `null` entry means unset.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl ProviderState {
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key).filter(|v| !v.is_null())
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: Value) {
        self.extra.insert(key.into(), value);
    }

    pub fn remove_extra(&mut self, key: &str) -> Option<Value> {
        self.extra.remove(key).filter(|v| !v.is_null())
    }
}

/// Bookkeeping the scanner uses to spot zombies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ZombieMarkers {
    /// Timeout captured when the worker was requested.
    #[serde(default)]
    pub queue_inactivity_timeout_secs: Option<u64>,
    /// Registration deadline for a requested worker.
    #[serde(default)]
    pub terminate_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

/// Whether a worker should shut down, and why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub terminate: bool,
    pub reason: VerdictReason,
    pub decided_at: DateTime<Utc>,
}

impl Verdict {
    pub fn new(reason: VerdictReason, decided_at: DateTime<Utc>) -> Self {
        Self {
            terminate: reason.terminates(),
            reason,
            decided_at,
        }
    }
}

/// Reason attached to a [`Verdict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VerdictReason {
    #[serde(rename = "launch config archived")]
    LaunchConfigArchived,
    #[serde(rename = "registration timeout exceeded")]
    RegistrationTimeout,
    #[serde(rename = "never claimed work")]
    NeverClaimed,
    #[serde(rename = "never reclaimed work")]
    NeverReclaimed,
    #[serde(rename = "inactive beyond timeout")]
    Inactive,
    #[serde(rename = "over capacity")]
    OverCapacity,
    #[serde(rename = "needed")]
    Needed,
}

impl VerdictReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LaunchConfigArchived => "launch config archived",
            Self::RegistrationTimeout => "registration timeout exceeded",
            Self::NeverClaimed => "never claimed work",
            Self::NeverReclaimed => "never reclaimed work",
            Self::Inactive => "inactive beyond timeout",
            Self::OverCapacity => "over capacity",
            Self::Needed => "needed",
        }
    }

    pub fn terminates(self) -> bool {
        self != Self::Needed
    }

    pub fn is_zombie(self) -> bool {
        matches!(
            self,
            Self::RegistrationTimeout | Self::NeverClaimed | Self::NeverReclaimed | Self::Inactive
        )
    }
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Pool errors ───────────────────────────────────────────────────

/// An append-only error report against a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolError {
    pub error_id: String,
    pub worker_pool_id: WorkerPoolId,
    pub kind: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub extra: Value,
    #[serde(default)]
    pub launch_config_id: Option<String>,
    pub reported: DateTime<Utc>,
}

/// Input for [`StateStore::report_error`](crate::StateStore::report_error).
#[derive(Debug, Clone, PartialEq)]
pub struct NewPoolError {
    pub kind: String,
    pub title: String,
    pub description: String,
    pub extra: Value,
    pub launch_config_id: Option<String>,
}

impl NewPoolError {
    pub fn new(kind: &str, title: &str, description: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            title: title.to_string(),
            description: description.into(),
            extra: Value::Null,
            launch_config_id: None,
        }
    }

    pub fn for_launch_config(mut self, launch_config_id: impl Into<String>) -> Self {
        self.launch_config_id = Some(launch_config_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn pool_id_must_have_two_segments() {
        assert!(split_worker_pool_id("proj/builder").is_ok());
        assert!(split_worker_pool_id("builder").is_err());
        assert!(split_worker_pool_id("a/b/c").is_err());
        assert!(split_worker_pool_id("/b").is_err());
    }

    #[test]
    fn config_rejects_inverted_bounds_and_low_inactivity_timeout() {
        let mut config = PoolConfig::with_capacity(5, 2);
        assert!(matches!(config.validate(), Err(StateError::Validation(_))));

        config = PoolConfig::with_capacity(0, 2);
        config.lifecycle.queue_inactivity_timeout_secs = Some(60);
        assert!(matches!(config.validate(), Err(StateError::Validation(_))));

        config.lifecycle.queue_inactivity_timeout_secs = Some(MIN_QUEUE_INACTIVITY_TIMEOUT_SECS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_defaults_fill_in_from_json() {
        let config: PoolConfig = serde_json::from_value(json!({
            "min_capacity": 0,
            "max_capacity": 10,
            "launch_configs": [{"configuration": {"region": "us-east-1"}}]
        }))
        .unwrap();
        assert_eq!(config.scaling_ratio, 1.0);
        assert_eq!(config.lifecycle, Lifecycle::default());
        assert_eq!(config.launch_configs[0].initial_weight, 1.0);
        assert_eq!(config.launch_configs[0].capacity_per_instance, 1);
    }

    #[test]
    fn derived_launch_config_id_is_stable_and_payload_sensitive() {
        let a = LaunchConfigSpec::new(json!({"region": "us-east-1", "image": "ami-1"}));
        let b = LaunchConfigSpec::new(json!({"image": "ami-1", "region": "us-east-1"}));
        let c = LaunchConfigSpec::new(json!({"region": "us-west-2", "image": "ami-1"}));
        assert_eq!(a.resolved_id(), b.resolved_id());
        assert_ne!(a.resolved_id(), c.resolved_id());
        assert!(a.resolved_id().starts_with("lc-"));
        assert_eq!(a.clone().with_id("lc1").resolved_id(), "lc1");
    }

    #[test]
    fn provider_change_tracks_previous_providers_once() {
        let mut pool = Pool::new("proj/builder", "aws", PoolConfig::with_capacity(0, 1), "me", now());
        pool.change_provider("gcp");
        pool.change_provider("aws");
        pool.change_provider("aws");
        assert_eq!(pool.provider_id, "aws");
        assert_eq!(pool.previous_provider_ids, vec!["gcp".to_string()]);
    }

    #[test]
    fn worker_states_only_move_forward() {
        use WorkerState::*;
        assert!(Requested.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(!Running.can_transition_to(Requested));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Running));
    }

    #[test]
    fn verdict_reason_serializes_as_its_label() {
        let value = serde_json::to_value(VerdictReason::OverCapacity).unwrap();
        assert_eq!(value, json!("over capacity"));
        assert_eq!(VerdictReason::LaunchConfigArchived.to_string(), "launch config archived");
        assert!(!Verdict::new(VerdictReason::Needed, now()).terminate);
        assert!(Verdict::new(VerdictReason::NeverClaimed, now()).terminate);
    }

    #[test]
    fn null_extra_entries_read_as_unset() {
        let mut state = ProviderState::default();
        state.set_extra("zone", json!("a"));
        state.extra.insert("rack".into(), Value::Null);
        assert_eq!(state.extra("zone"), Some(&json!("a")));
        assert_eq!(state.extra("rack"), None);
    }
}
