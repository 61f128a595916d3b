//! Prometheus text exposition format.
//!
//! Renders a [`MetricsSnapshot`] into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use crate::registry::MetricsSnapshot;

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

/// Escape a label value per the exposition format.
fn label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Render a metrics snapshot into Prometheus text format.
///
/// Produces GAUGE and COUNTER metrics with `pool` labels.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    let gauges: [(&str, &str, fn(&crate::PoolGauges) -> i64); 7] = [
        ("fleetgrid_pending_tasks", "Pending tasks seen by the last estimate.", |g| g.pending_tasks),
        ("fleetgrid_claimed_tasks", "Claimed tasks seen by the last estimate.", |g| g.claimed_tasks),
        ("fleetgrid_existing_capacity", "Running, non-quarantined capacity.", |g| g.existing_capacity),
        ("fleetgrid_requested_capacity", "Requested capacity not yet running.", |g| g.requested_capacity),
        ("fleetgrid_stopping_capacity", "Capacity currently stopping.", |g| g.stopping_capacity),
        ("fleetgrid_desired_capacity", "Capacity the pool should have.", |g| i64::from(g.desired_capacity)),
        ("fleetgrid_capacity_to_spawn", "Capacity requested by the last estimate.", |g| i64::from(g.to_spawn)),
    ];
    for (name, help, value) in gauges {
        header(&mut out, name, help, "gauge");
        for (pool, g) in &snapshot.pools {
            let _ = writeln!(out, "{name}{{pool=\"{}\"}} {}", label(pool), value(g));
        }
    }

    header(
        &mut out,
        "fleetgrid_launch_config_weight",
        "Launch config selection weight after derating.",
        "gauge",
    );
    for ((pool, lc), weight) in &snapshot.launch_config_weights {
        let _ = writeln!(
            out,
            "fleetgrid_launch_config_weight{{pool=\"{}\",launch_config=\"{}\"}} {:.4}",
            label(pool),
            label(lc),
            weight
        );
    }

    header(
        &mut out,
        "fleetgrid_workers_to_terminate",
        "Workers the last scan marked for termination.",
        "gauge",
    );
    for ((pool, provider, reason), count) in &snapshot.workers_to_terminate {
        let _ = writeln!(
            out,
            "fleetgrid_workers_to_terminate{{pool=\"{}\",provider=\"{}\",reason=\"{}\"}} {count}",
            label(pool),
            label(provider),
            label(reason)
        );
    }

    let counters = [
        (
            "fleetgrid_over_capacity_alerts_total",
            "Transitions into over-capacity.",
            &snapshot.over_capacity_alerts,
        ),
        (
            "fleetgrid_scan_failures_total",
            "Pools or workers a scan could not evaluate.",
            &snapshot.scan_failures,
        ),
        (
            "fleetgrid_provision_failures_total",
            "Pools a provisioning pass could not handle.",
            &snapshot.provision_failures,
        ),
    ];
    for (name, help, values) in counters {
        header(&mut out, name, help, "counter");
        for (pool, count) in values {
            let _ = writeln!(out, "{name}{{pool=\"{}\"}} {count}", label(pool));
        }
    }

    out
}
