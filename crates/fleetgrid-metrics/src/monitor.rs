//! Monitoring events and the sinks that receive them.
//!
//! The capacity loops report what they decided through a [`MonitorSink`]
//! instead of talking to a metrics backend directly. The daemon fans events
//! out to the tracing log and the Prometheus registry; tests capture them
//! with a [`RecordingMonitor`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Something a control loop wants observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MonitorEvent {
    /// Inputs and outputs of one capacity estimate.
    Estimate {
        worker_pool_id: String,
        pending_tasks: i64,
        claimed_tasks: i64,
        min_capacity: i64,
        max_capacity: i64,
        scaling_ratio: f64,
        existing_capacity: i64,
        requested_capacity: i64,
        stopping_capacity: i64,
        desired_capacity: u32,
        to_spawn: u32,
    },
    /// Launch config weights after derating.
    SelectorWeights {
        worker_pool_id: String,
        weights: BTreeMap<String, f64>,
        remaining_capacity: BTreeMap<String, u64>,
    },
    /// A pool newly runs more capacity than its maximum.
    OverCapacity {
        worker_pool_id: String,
        existing_capacity: i64,
        max_capacity: i64,
    },
    /// Workers a scan marked for termination, per reason.
    WorkersToTerminate {
        worker_pool_id: String,
        provider_id: String,
        reason: String,
        count: u64,
    },
    /// A pool or worker the scanner could not evaluate.
    ScanFailure {
        worker_pool_id: String,
        worker: Option<String>,
        message: String,
    },
    /// A pool the provisioner could not provision.
    ProvisionFailure {
        worker_pool_id: String,
        message: String,
    },
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Estimate { .. } => "estimate",
            Self::SelectorWeights { .. } => "selector-weights",
            Self::OverCapacity { .. } => "over-capacity",
            Self::WorkersToTerminate { .. } => "workers-to-terminate",
            Self::ScanFailure { .. } => "scan-failure",
            Self::ProvisionFailure { .. } => "provision-failure",
        }
    }

    pub fn worker_pool_id(&self) -> &str {
        match self {
            Self::Estimate { worker_pool_id, .. }
            | Self::SelectorWeights { worker_pool_id, .. }
            | Self::OverCapacity { worker_pool_id, .. }
            | Self::WorkersToTerminate { worker_pool_id, .. }
            | Self::ScanFailure { worker_pool_id, .. }
            | Self::ProvisionFailure { worker_pool_id, .. } => worker_pool_id,
        }
    }
}

/// Receiver of monitoring events. Must not block.
pub trait MonitorSink: Send + Sync {
    fn record(&self, event: MonitorEvent);
}

impl<T: MonitorSink + ?Sized> MonitorSink for Arc<T> {
    fn record(&self, event: MonitorEvent) {
        (**self).record(event)
    }
}

/// Writes every event to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMonitor;

impl MonitorSink for TracingMonitor {
    fn record(&self, event: MonitorEvent) {
        match &event {
            MonitorEvent::Estimate {
                worker_pool_id,
                pending_tasks,
                claimed_tasks,
                existing_capacity,
                requested_capacity,
                stopping_capacity,
                desired_capacity,
                to_spawn,
                ..
            } => info!(
                %worker_pool_id,
                pending_tasks,
                claimed_tasks,
                existing_capacity,
                requested_capacity,
                stopping_capacity,
                desired_capacity,
                to_spawn,
                "capacity estimate"
            ),
            MonitorEvent::SelectorWeights {
                worker_pool_id,
                weights,
                remaining_capacity,
            } => debug!(
                %worker_pool_id,
                ?weights,
                ?remaining_capacity,
                "selector weights"
            ),
            MonitorEvent::OverCapacity {
                worker_pool_id,
                existing_capacity,
                max_capacity,
            } => warn!(
                %worker_pool_id,
                existing_capacity,
                max_capacity,
                "worker pool is over its maximum capacity"
            ),
            MonitorEvent::WorkersToTerminate {
                worker_pool_id,
                provider_id,
                reason,
                count,
            } => info!(
                %worker_pool_id,
                %provider_id,
                %reason,
                count,
                "workers to terminate"
            ),
            MonitorEvent::ScanFailure {
                worker_pool_id,
                worker,
                message,
            } => error!(%worker_pool_id, ?worker, %message, "scan failed"),
            MonitorEvent::ProvisionFailure {
                worker_pool_id,
                message,
            } => error!(%worker_pool_id, %message, "provisioning failed"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<MonitorEvent>>,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events with the given [`MonitorEvent::name`].
    pub fn named(&self, name: &str) -> Vec<MonitorEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name() == name)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl MonitorSink for RecordingMonitor {
    fn record(&self, event: MonitorEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Sends every event to several sinks.
#[derive(Clone, Default)]
pub struct Fanout {
    sinks: Vec<Arc<dyn MonitorSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn MonitorSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl MonitorSink for Fanout {
    fn record(&self, event: MonitorEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(event.clone());
            }
            last.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(pool: &str) -> MonitorEvent {
        MonitorEvent::ProvisionFailure {
            worker_pool_id: pool.into(),
            message: "boom".into(),
        }
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(RecordingMonitor::new());
        let b = Arc::new(RecordingMonitor::new());
        let fanout = Fanout::new().with(a.clone()).with(b.clone());

        fanout.record(failure("p/a"));
        assert_eq!(a.events(), vec![failure("p/a")]);
        assert_eq!(b.events(), vec![failure("p/a")]);
    }

    #[test]
    fn recording_filters_by_name() {
        let monitor = RecordingMonitor::new();
        monitor.record(failure("p/a"));
        monitor.record(MonitorEvent::OverCapacity {
            worker_pool_id: "p/a".into(),
            existing_capacity: 3,
            max_capacity: 2,
        });
        assert_eq!(monitor.named("over-capacity").len(), 1);
        monitor.clear();
        assert!(monitor.events().is_empty());
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let json = serde_json::to_value(failure("p/a")).unwrap();
        assert_eq!(json["type"], "provision-failure");
        assert_eq!(json["worker_pool_id"], "p/a");
    }
}
