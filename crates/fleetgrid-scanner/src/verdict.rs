//! Termination rules.
//!
//! Pure functions of the workers, the pool's active launch configs, the
//! target capacity and the clock. Nothing from a previous scan feeds into
//! the next, so changed demand or configuration takes effect on the very
//! next pass.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use fleetgrid_state::{VerdictReason, Worker};

/// What the rules need to know about the pool.
#[derive(Debug, Clone)]
pub struct RuleContext<'a> {
    pub now: DateTime<Utc>,
    /// Ids of the pool's non-archived launch configs.
    pub active_launch_configs: &'a HashSet<String>,
    /// Capacity the pool should have, in workers.
    pub target_capacity: u32,
    /// Inactivity timeout for workers that captured none at request time.
    pub queue_inactivity_timeout: Duration,
}

/// Rule 1: the worker runs a launch config that is archived or gone.
///
/// Workers without a launch config never match.
pub fn launch_config_archived(worker: &Worker, ctx: &RuleContext<'_>) -> bool {
    worker
        .launch_config_id
        .as_ref()
        .is_some_and(|id| !ctx.active_launch_configs.contains(id))
}

/// Rule 2: the worker missed its registration deadline or stopped
/// taking work for longer than its inactivity timeout.
pub fn zombie_reason(worker: &Worker, ctx: &RuleContext<'_>) -> Option<VerdictReason> {
    let zombie = &worker.provider_state.zombie;
    if zombie.terminate_after.is_some_and(|deadline| deadline < ctx.now) {
        return Some(VerdictReason::RegistrationTimeout);
    }

    let timeout = zombie
        .queue_inactivity_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(ctx.queue_inactivity_timeout);
    let cutoff = chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|t| ctx.now.checked_sub_signed(t))?;

    match (worker.first_claim, worker.last_date_active) {
        (None, _) if worker.created < cutoff => Some(VerdictReason::NeverClaimed),
        (Some(first), None) if first < cutoff => Some(VerdictReason::NeverReclaimed),
        (_, Some(last)) if last < cutoff => Some(VerdictReason::Inactive),
        _ => None,
    }
}

/// Verdict reasons for `workers`, which must be ordered oldest first.
///
/// Archived and zombie workers are retired regardless of demand. The
/// remaining workers beyond the target are retired from the oldest end,
/// so the newest `target_capacity` survivors are kept.
pub fn evaluate(workers: &[&Worker], ctx: &RuleContext<'_>) -> Vec<VerdictReason> {
    let mut reasons: Vec<Option<VerdictReason>> = workers
        .iter()
        .map(|w| {
            if launch_config_archived(w, ctx) {
                Some(VerdictReason::LaunchConfigArchived)
            } else {
                zombie_reason(w, ctx)
            }
        })
        .collect();

    let survivors = reasons.iter().filter(|r| r.is_none()).count();
    let mut surplus = survivors.saturating_sub(ctx.target_capacity as usize);
    for reason in reasons.iter_mut().filter(|r| r.is_none()) {
        if surplus == 0 {
            break;
        }
        *reason = Some(VerdictReason::OverCapacity);
        surplus -= 1;
    }

    reasons
        .into_iter()
        .map(|r| r.unwrap_or(VerdictReason::Needed))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as Span;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn worker(id: &str, age_mins: i64) -> Worker {
        let created = now() - Span::minutes(age_mins);
        Worker::requested("proj/builder", "g", id, "aws", 1, created, now() + Span::days(1))
            .with_launch_config("lc1")
    }

    fn active(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn ctx(active: &HashSet<String>, target: u32) -> RuleContext<'_> {
        RuleContext {
            now: now(),
            active_launch_configs: active,
            target_capacity: target,
            queue_inactivity_timeout: Duration::from_secs(7200),
        }
    }

    #[test]
    fn oldest_surplus_worker_is_retired() {
        let lcs = active(&["lc1"]);
        let old = worker("old", 20);
        let new = worker("new", 10);
        assert_eq!(
            evaluate(&[&old, &new], &ctx(&lcs, 1)),
            vec![VerdictReason::OverCapacity, VerdictReason::Needed]
        );
        assert_eq!(
            evaluate(&[&old, &new], &ctx(&lcs, 2)),
            vec![VerdictReason::Needed, VerdictReason::Needed]
        );
        assert_eq!(
            evaluate(&[&old, &new], &ctx(&lcs, 0)),
            vec![VerdictReason::OverCapacity, VerdictReason::OverCapacity]
        );
    }

    #[test]
    fn archived_launch_config_wins_over_capacity_math() {
        let lcs = active(&["lc2"]);
        let w = worker("w", 10);
        let bare = Worker {
            launch_config_id: None,
            ..worker("bare", 5)
        };
        assert_eq!(
            evaluate(&[&w, &bare], &ctx(&lcs, 100)),
            vec![VerdictReason::LaunchConfigArchived, VerdictReason::Needed]
        );
    }

    #[test]
    fn retired_workers_do_not_count_towards_the_target() {
        let lcs = active(&["lc1"]);
        let old = worker("old", 30);
        let mid = worker("mid", 20);
        let archived = Worker {
            launch_config_id: Some("gone".into()),
            ..worker("archived", 10)
        };
        assert_eq!(
            evaluate(&[&old, &mid, &archived], &ctx(&lcs, 2)),
            vec![
                VerdictReason::Needed,
                VerdictReason::Needed,
                VerdictReason::LaunchConfigArchived
            ]
        );
    }

    #[test]
    fn zombie_reasons_name_the_failure() {
        let lcs = active(&["lc1"]);
        let c = ctx(&lcs, 10);

        let fresh = worker("fresh", 60);
        assert_eq!(zombie_reason(&fresh, &c), None);

        let idle = worker("idle", 180);
        assert_eq!(zombie_reason(&idle, &c), Some(VerdictReason::NeverClaimed));

        let once = Worker {
            first_claim: Some(now() - Span::minutes(150)),
            ..worker("once", 180)
        };
        assert_eq!(zombie_reason(&once, &c), Some(VerdictReason::NeverReclaimed));

        let stale = Worker {
            first_claim: Some(now() - Span::minutes(170)),
            last_date_active: Some(now() - Span::minutes(130)),
            ..worker("stale", 180)
        };
        assert_eq!(zombie_reason(&stale, &c), Some(VerdictReason::Inactive));

        let busy = Worker {
            first_claim: Some(now() - Span::minutes(170)),
            last_date_active: Some(now() - Span::minutes(1)),
            ..worker("busy", 180)
        };
        assert_eq!(zombie_reason(&busy, &c), None);
    }

    #[test]
    fn captured_timeout_overrides_the_default() {
        let lcs = active(&["lc1"]);
        let mut w = worker("w", 30);
        w.provider_state.zombie.queue_inactivity_timeout_secs = Some(1200);
        assert_eq!(zombie_reason(&w, &ctx(&lcs, 1)), Some(VerdictReason::NeverClaimed));
    }

    #[test]
    fn missed_registration_deadline_is_a_zombie() {
        let lcs = active(&["lc1"]);
        let mut w = worker("w", 10);
        w.provider_state.zombie.terminate_after = Some(now() - Span::minutes(1));
        assert_eq!(
            evaluate(&[&w], &ctx(&lcs, 5)),
            vec![VerdictReason::RegistrationTimeout]
        );
    }
}
