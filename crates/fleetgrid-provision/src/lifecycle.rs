//! Worker lifecycle transitions driven by the worker itself or the queue.
//!
//! Each operation is a single optimistic update on the worker row, so it
//! composes with the scanner and provisioner writing other fields of the
//! same worker.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use fleetgrid_state::{StateError, StateResult, StateStore, Versioned, Worker, WorkerState};

/// Identifies one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRef<'a> {
    pub worker_pool_id: &'a str,
    pub worker_group: &'a str,
    pub worker_id: &'a str,
}

impl<'a> WorkerRef<'a> {
    pub fn new(worker_pool_id: &'a str, worker_group: &'a str, worker_id: &'a str) -> Self {
        Self {
            worker_pool_id,
            worker_group,
            worker_id,
        }
    }

    fn update<F>(&self, store: &StateStore, modify: F) -> StateResult<Versioned<Worker>>
    where
        F: FnMut(&mut Worker) -> StateResult<()>,
    {
        store.update_worker(self.worker_pool_id, self.worker_group, self.worker_id, modify)
    }
}

/// `at + d`, saturating at the latest representable time.
pub(crate) fn deadline_after(at: DateTime<Utc>, d: std::time::Duration) -> DateTime<Utc> {
    Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A worker announces that it is up.
///
/// Moves REQUESTED to RUNNING; a RUNNING worker re-registers. Either way
/// `expires` and the re-registration deadline move to
/// `now + reregistration_timeout`.
pub fn register_worker(
    store: &StateStore,
    worker: WorkerRef<'_>,
    provider_id: &str,
    now: DateTime<Utc>,
) -> StateResult<Versioned<Worker>> {
    let pool = store.pool(worker.worker_pool_id)?;
    let deadline = deadline_after(now, pool.config.lifecycle.reregistration_timeout());

    let registered = worker.update(store, |w| {
        if w.provider_id != provider_id {
            return Err(StateError::Validation(format!(
                "worker {}/{} belongs to provider {}, not {provider_id}",
                w.worker_group, w.worker_id, w.provider_id
            )));
        }
        match w.state {
            WorkerState::Requested => w.transition(WorkerState::Running)?,
            WorkerState::Running => {}
            WorkerState::Stopping | WorkerState::Stopped => {
                return Err(StateError::Validation(format!(
                    "worker {}/{} is {} and cannot register",
                    w.worker_group, w.worker_id, w.state
                )));
            }
        }
        w.expires = deadline;
        w.provider_state.zombie.terminate_after = Some(deadline);
        w.last_modified = now;
        Ok(())
    })?;
    info!(
        worker_pool_id = worker.worker_pool_id,
        worker_group = worker.worker_group,
        worker_id = worker.worker_id,
        expires = %registered.expires,
        "worker registered"
    );
    Ok(registered)
}

/// The queue saw the worker claim or reclaim work at `at`.
///
/// The first report is the claim and only sets `first_claim`; every later
/// report is a reclaim and moves `last_date_active` forward.
pub fn record_queue_activity(
    store: &StateStore,
    worker: WorkerRef<'_>,
    at: DateTime<Utc>,
) -> StateResult<Versioned<Worker>> {
    worker.update(store, |w| {
        if w.first_claim.is_none() {
            w.first_claim = Some(at);
        } else if w.last_date_active.is_none_or(|last| last < at) {
            w.last_date_active = Some(at);
        }
        Ok(())
    })
}

/// Keep the worker from claiming work until `until`; `None` lifts it.
pub fn quarantine_worker(
    store: &StateStore,
    worker: WorkerRef<'_>,
    until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StateResult<Versioned<Worker>> {
    let updated = worker.update(store, |w| {
        if w.quarantine_until != until {
            w.quarantine_until = until;
            w.last_modified = now;
        }
        Ok(())
    })?;
    debug!(
        worker_pool_id = worker.worker_pool_id,
        worker_id = worker.worker_id,
        until = ?until,
        "worker quarantine updated"
    );
    Ok(updated)
}

/// The worker started shutting down.
pub fn mark_stopping(
    store: &StateStore,
    worker: WorkerRef<'_>,
    now: DateTime<Utc>,
) -> StateResult<Versioned<Worker>> {
    worker.update(store, |w| {
        if w.state != WorkerState::Stopping {
            w.transition(WorkerState::Stopping)?;
            w.last_modified = now;
        }
        Ok(())
    })
}

/// The worker is gone for good. Stopping an already stopped worker is a no-op.
pub fn mark_stopped(
    store: &StateStore,
    worker: WorkerRef<'_>,
    now: DateTime<Utc>,
) -> StateResult<Versioned<Worker>> {
    worker.update(store, |w| {
        if w.state != WorkerState::Stopped {
            w.transition(WorkerState::Stopped)?;
            w.last_modified = now;
        }
        Ok(())
    })
}
