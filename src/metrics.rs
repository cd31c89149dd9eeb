//! Process-level metrics exported through the `metrics` facade.
//!
//! No exporter is embedded: an application installs any compatible recorder
//! and these calls feed it. Without a recorder they are no-ops.
//!
//! Provided metrics:
//! * `cluster_transport_requests_total` (counter, by method)
//! * `cluster_transport_failures_total` (counter, by node)
//! * `cluster_transport_round_trip_duration_seconds` (histogram, by node and status)
//! * `cluster_transport_connections` (gauge, by state)
//! * `cluster_transport_resurrections_total` (counter, by node)
//! * `cluster_transport_discoveries_total` (counter, by outcome)
use std::{collections::HashMap, time::Instant};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

pub const REQUESTS_TOTAL: &str = "cluster_transport_requests_total";
pub const FAILURES_TOTAL: &str = "cluster_transport_failures_total";
pub const ROUND_TRIP_DURATION_SECONDS: &str = "cluster_transport_round_trip_duration_seconds";
pub const CONNECTIONS: &str = "cluster_transport_connections";
pub const RESURRECTIONS_TOTAL: &str = "cluster_transport_resurrections_total";
pub const DISCOVERIES_TOTAL: &str = "cluster_transport_discoveries_total";

/// Last reported connection counts, by state.
pub static CONNECTION_GAUGES: Lazy<Mutex<HashMap<&'static str, f64>>> = Lazy::new(|| {
    describe_counter!(
        REQUESTS_TOTAL,
        Unit::Count,
        "Total number of requests performed by the transport."
    );
    describe_counter!(
        FAILURES_TOTAL,
        Unit::Count,
        "Round-trips that failed at the network level."
    );
    describe_histogram!(
        ROUND_TRIP_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of individual round-trips to cluster nodes."
    );
    describe_gauge!(CONNECTIONS, "Known connections of the active pool, by state.");
    describe_counter!(
        RESURRECTIONS_TOTAL,
        Unit::Count,
        "Dead connections moved back to live by the resurrection timer."
    );
    describe_counter!(
        DISCOVERIES_TOTAL,
        Unit::Count,
        "Node discovery runs, by outcome."
    );

    Mutex::new(HashMap::new())
});

/// Count a performed request (once per call, not per attempt).
pub fn increment_requests(method: &str) {
    counter!(REQUESTS_TOTAL, "method" => method.to_string()).increment(1);
}

/// Count a network-level round-trip failure.
pub fn increment_failures(node: &str) {
    counter!(FAILURES_TOTAL, "node" => node.to_string()).increment(1);
}

/// Record one round-trip. `status` is `None` for network failures.
pub fn record_round_trip(node: &str, status: Option<u16>, duration: std::time::Duration) {
    let status = status.map_or_else(|| "error".to_string(), |s| s.to_string());
    histogram!(
        ROUND_TRIP_DURATION_SECONDS,
        "node" => node.to_string(),
        "status" => status
    )
    .record(duration.as_secs_f64());
}

/// Publish live and dead connection counts.
pub fn set_connections(live: usize, dead: usize) {
    let mut gauges = CONNECTION_GAUGES.lock();
    for (state, count) in [("live", live), ("dead", dead)] {
        gauges.insert(state, count as f64);
        gauge!(CONNECTIONS, "state" => state).set(count as f64);
    }
}

pub fn increment_resurrections(node: &str) {
    counter!(RESURRECTIONS_TOTAL, "node" => node.to_string()).increment(1);
}

/// `outcome` is one of `updated`, `unchanged` or `failed`.
pub fn increment_discoveries(outcome: &'static str) {
    counter!(DISCOVERIES_TOTAL, "outcome" => outcome).increment(1);
}

/// RAII helper measuring a round-trip. Records a network failure unless
/// [`RoundTripTimer::status`] was called before the drop.
pub struct RoundTripTimer {
    start: Instant,
    node: String,
    status: Option<u16>,
}

impl RoundTripTimer {
    pub fn new(node: &str) -> Self {
        Self {
            start: Instant::now(),
            node: node.to_string(),
            status: None,
        }
    }

    pub fn status(&mut self, status: u16) {
        self.status = Some(status);
    }
}

impl Drop for RoundTripTimer {
    fn drop(&mut self) {
        record_round_trip(&self.node, self.status, self.start.elapsed());
    }
}

/// Register metric descriptions (idempotent).
pub fn init_metrics() {
    Lazy::force(&CONNECTION_GAUGES);
    tracing::debug!("Transport metric descriptions registered");
}

/// Snapshot of the connection gauges for ad-hoc exports.
pub fn get_current_metrics() -> HashMap<String, f64> {
    CONNECTION_GAUGES
        .lock()
        .iter()
        .map(|(state, value)| (format!("connections_{state}"), *value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_connections() {
        set_connections(3, 1);
        let metrics = get_current_metrics();
        assert_eq!(metrics.get("connections_live"), Some(&3.0));
        assert_eq!(metrics.get("connections_dead"), Some(&1.0));
    }

    #[test]
    fn test_round_trip_timer() {
        let mut timer = RoundTripTimer::new("http://node:9200");
        timer.status(200);
        drop(timer);

        let failed = RoundTripTimer::new("http://node:9200");
        drop(failed);
    }

    #[test]
    fn test_counters_without_recorder() {
        init_metrics();
        increment_requests("GET");
        increment_failures("http://node:9200");
        increment_resurrections("http://node:9200");
        increment_discoveries("updated");
    }
}
