//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    // Placement
    describe_counter!(
        "flotilla_placements_total",
        "Total number of containers placed (by strategy)"
    );
    describe_counter!(
        "flotilla_placement_failures_total",
        "Total number of failed placement calls (by strategy)"
    );

    // Dispatch
    describe_counter!(
        "flotilla_container_outcomes_total",
        "Per-container operation outcomes (by operation, state)"
    );
    describe_histogram!(
        "flotilla_deploy_duration_seconds",
        "Time from deploy start until every dispatch settled (by status)"
    );

    // Host pool
    describe_gauge!("flotilla_registered_hosts", "Current number of registered hosts");
    describe_counter!(
        "flotilla_host_ping_failures_total",
        "Total number of failed host liveness checks"
    );

    // Storage
    describe_counter!("flotilla_db_errors_total", "Total number of failed database queries");
}

pub fn record_placements(strategy: &str, count: usize) {
    counter!("flotilla_placements_total", "strategy" => strategy.to_string())
        .increment(count as u64);
}

pub fn record_placement_failure(strategy: &str) {
    counter!("flotilla_placement_failures_total", "strategy" => strategy.to_string())
        .increment(1);
}

pub fn record_container_outcome(operation: &str, state: &str) {
    counter!(
        "flotilla_container_outcomes_total",
        "operation" => operation.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

pub fn set_registered_hosts(count: usize) {
    gauge!("flotilla_registered_hosts").set(count as f64);
}

pub fn record_ping_failure(host_id: &str) {
    counter!("flotilla_host_ping_failures_total", "host" => host_id.to_string()).increment(1);
}

pub fn record_deploy_duration(duration_secs: f64, status: &str) {
    histogram!("flotilla_deploy_duration_seconds", "status" => status.to_string())
        .record(duration_secs);
}
