//! Client-side request accounting.
//!
//! Counters keep advancing while a snapshot is taken, so a snapshot is a
//! best-effort view rather than a consistent cut.
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::connection::Connection;

/// Request/failure counters and a response-code histogram.
#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    failures: AtomicU64,
    responses: Mutex<HashMap<u16, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_response(&self, status: u16) {
        *self.responses.lock().entry(status).or_insert(0) += 1;
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Compose a snapshot with per-connection entries.
    pub fn snapshot(&self, connections: &[Arc<Connection>]) -> MetricsSnapshot {
        let responses = self.responses.lock().clone();
        MetricsSnapshot {
            requests: self.requests(),
            failures: self.failures(),
            responses,
            connections: connections.iter().map(|c| ConnectionMetric::from(c.as_ref())).collect(),
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub responses: HashMap<u16, u64>,
    pub connections: Vec<ConnectionMetric>,
}

/// Liveness view of one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetric {
    pub url: String,
    pub is_dead: bool,
    pub failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_since: Option<DateTime<Utc>>,
}

impl From<&Connection> for ConnectionMetric {
    fn from(conn: &Connection) -> Self {
        let state = conn.state();
        Self {
            url: conn.url().to_string(),
            is_dead: state.is_dead,
            failures: state.failures,
            dead_since: state.dead_since,
        }
    }
}
