//! Node discovery.
//!
//! Fetches `GET /_nodes/http`, turns each node's publish address into a
//! connection and swaps a freshly partitioned pool into the client. Nodes
//! that fail their probe are kept in `dead` and resurrected later.
use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use axum::body::Body;
use futures_util::future::join_all;
use http_body_util::BodyExt;
use serde::Deserialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use crate::{
    core::{
        client::ClientInner,
        connection::{Connection, RoleSet},
        perform,
        pool::{ClientPool, ConnectionPool, SinglePool, StatusPool},
    },
    error::{Error, Result},
    tracing_setup::configure_component_tracing,
};

pub const NODES_PATH: &str = "/_nodes/http";

#[derive(Debug, Deserialize)]
struct NodesResponse {
    #[serde(default)]
    nodes: HashMap<String, NodeInfo>,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    attributes: HashMap<String, serde_json::Value>,
    http: Option<NodeHttp>,
}

#[derive(Debug, Deserialize)]
struct NodeHttp {
    #[serde(default)]
    publish_address: String,
}

/// Build a node URL from a publish address.
///
/// Accepts `host:port`, `[v6]:port` and `hostname/ip:port`; in the last form
/// the hostname is kept and joined with the port.
pub fn parse_publish_address(address: &str, scheme: &str) -> Result<Url> {
    let host = match address.split_once('/') {
        Some((hostname, ip_port)) => {
            let (_, port) = ip_port
                .rsplit_once(':')
                .ok_or_else(|| Error::Discovery(format!("no port in publish address {address}")))?;
            if hostname.is_empty() {
                ip_port.to_string()
            } else {
                format!("{hostname}:{port}")
            }
        }
        None => address.to_string(),
    };

    Url::parse(&format!("{scheme}://{host}"))
        .map_err(|e| Error::Discovery(format!("invalid publish address {address}: {e}")))
}

/// Decode a `/_nodes/http` body into connections, sorted by URL.
///
/// Dedicated cluster managers are dropped unless `include_cluster_managers`
/// is set. Nodes without a usable publish address are skipped.
pub fn decode_nodes(
    body: &[u8],
    scheme: &str,
    include_cluster_managers: bool,
) -> Result<Vec<Connection>> {
    let decoded: NodesResponse = serde_json::from_slice(body)
        .map_err(|e| Error::Discovery(format!("cannot decode nodes response: {e}")))?;

    let mut connections = Vec::with_capacity(decoded.nodes.len());
    for (id, node) in decoded.nodes {
        let Some(address) = node
            .http
            .as_ref()
            .map(|http| http.publish_address.as_str())
            .filter(|address| !address.is_empty())
        else {
            tracing::debug!("Node {} ({}) has no HTTP publish address", node.name, id);
            continue;
        };

        let url = match parse_publish_address(address, scheme) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Skipping node {}: {}", node.name, e);
                continue;
            }
        };

        let roles = RoleSet::new(node.roles);
        if roles.is_dedicated_cluster_manager() && !include_cluster_managers {
            tracing::debug!("Skipping dedicated cluster manager {} ({})", node.name, url);
            continue;
        }

        let attributes = node
            .attributes
            .into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect();

        connections.push(Connection::with_metadata(url, id, node.name, roles, attributes));
    }

    connections.sort_by(|a, b| a.url().as_str().cmp(b.url().as_str()));
    Ok(connections)
}

/// Connections of a refresh, split against the previous set.
#[derive(Debug, Default)]
pub(crate) struct Diff {
    pub(crate) added: Vec<Arc<Connection>>,
    pub(crate) removed: Vec<Arc<Connection>>,
    pub(crate) unchanged: Vec<Arc<Connection>>,
    /// Every connection of the refresh; unchanged ones are the previous
    /// instances.
    pub(crate) all: Vec<Arc<Connection>>,
}

pub(crate) fn diff(previous: &[Arc<Connection>], discovered: Vec<Connection>) -> Diff {
    let mut diff = Diff::default();
    for conn in discovered {
        match previous.iter().find(|old| old.same_node(&conn)) {
            Some(old) => {
                diff.unchanged.push(old.clone());
                diff.all.push(old.clone());
            }
            None => {
                let conn = Arc::new(conn);
                diff.added.push(conn.clone());
                diff.all.push(conn);
            }
        }
    }
    diff.removed = previous
        .iter()
        .filter(|old| !diff.unchanged.iter().any(|c| Arc::ptr_eq(c, old)))
        .cloned()
        .collect();
    diff
}

struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Run one discovery. A call made while another one runs returns at once.
pub(crate) async fn discover_nodes(inner: &ClientInner) -> Result<()> {
    if inner
        .discovery_in_progress
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        tracing::debug!("Discovery already in progress, skipping");
        return Ok(());
    }
    let _in_progress = InProgress(&inner.discovery_in_progress);

    match refresh(inner).await {
        Ok(()) => {
            crate::metrics::increment_discoveries("success");
            Ok(())
        }
        Err(e) => {
            crate::metrics::increment_discoveries("failure");
            tracing::warn!("Node discovery failed: {}", e);
            Err(e)
        }
    }
}

async fn fetch_nodes(inner: &ClientInner) -> Result<Vec<Connection>> {
    let request = http::Request::get(NODES_PATH)
        .body(Body::empty())
        .map_err(|e| Error::Discovery(e.to_string()))?;
    let response = perform::perform(inner, request).await?;

    if !response.status().is_success() {
        return Err(Error::Discovery(format!(
            "unexpected status {} from {}",
            response.status(),
            NODES_PATH
        )));
    }

    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::Body(e.to_string()))?
        .to_bytes();

    let scheme = inner
        .settings
        .urls
        .first()
        .map(Url::scheme)
        .unwrap_or("http");
    decode_nodes(&body, scheme, inner.settings.include_dedicated_cluster_managers)
}

async fn refresh(inner: &ClientInner) -> Result<()> {
    let discovered = fetch_nodes(inner).await?;
    if discovered.is_empty() {
        tracing::warn!("Discovery returned no usable nodes, keeping the current pool");
        return Ok(());
    }

    let current = inner.pool.load_full();
    let previous = match &current {
        Some(pool) => pool.connections(),
        None => inner.seeds.clone(),
    };
    let delta = diff(&previous, discovered);

    let (live, dead) = match &current {
        // Cold start: trust the node list, probe in the background.
        None => (delta.all.clone(), Vec::new()),
        Some(_) => probe_all(inner, &delta.all).await,
    };
    let (live_count, dead_count) = (live.len(), dead.len());

    let pool = Arc::new(build_pool(inner, current.as_deref(), live, dead));
    inner.pool.store(Some(pool.clone()));

    if current.is_none() {
        spawn_background_probes(inner, &pool, &delta.all);
    }

    if let Some(router) = &inner.router {
        router.discovery_update(&delta.added, &delta.removed, &delta.unchanged);
        router.check_dead(inner.health_check.as_ref()).await;
    }

    crate::metrics::set_connections(live_count, dead_count);
    tracing::info!(
        "Discovered {} nodes ({} live, {} dead; {} added, {} removed)",
        delta.all.len(),
        live_count,
        dead_count,
        delta.added.len(),
        delta.removed.len()
    );
    Ok(())
}

/// Probe every connection in parallel and partition by the outcome.
async fn probe_all(
    inner: &ClientInner,
    connections: &[Arc<Connection>],
) -> (Vec<Arc<Connection>>, Vec<Arc<Connection>>) {
    let probes = connections.iter().map(|conn| {
        let probe = inner.discovery_probe.clone();
        async move {
            let result = probe.check(conn.url()).await;
            (conn.clone(), result)
        }
    });

    let mut live = Vec::new();
    let mut dead = Vec::new();
    for (conn, result) in join_all(probes).await {
        match result {
            Ok(_) => {
                conn.mark_as_healthy();
                live.push(conn);
            }
            Err(e) => {
                tracing::warn!("Health check of {} failed during discovery: {}", conn, e);
                if !conn.is_dead() {
                    conn.mark_as_dead();
                }
                dead.push(conn);
            }
        }
    }
    (live, dead)
}

fn build_pool(
    inner: &ClientInner,
    current: Option<&ClientPool>,
    live: Vec<Arc<Connection>>,
    dead: Vec<Arc<Connection>>,
) -> ClientPool {
    let mut settings = inner.pool_settings.clone();
    if let Some(metrics) = current.and_then(ClientPool::metrics) {
        settings.metrics = Some(metrics.clone());
    }

    if live.len() + dead.len() == 1 {
        let status = StatusPool::from_partitions(live, dead, inner.selector.clone(), settings);
        if let Some(single) = SinglePool::demote(&status) {
            return ClientPool::Single(single);
        }
        return ClientPool::Status(status);
    }

    let pool = (inner.pool_factory)(live, inner.selector.clone());
    pool.add_dead(&dead);
    match current {
        Some(ClientPool::Single(single)) => ClientPool::Status(StatusPool::promote(single, pool)),
        _ => ClientPool::Status(pool.with_metrics(settings.metrics)),
    }
}

fn spawn_background_probes(
    inner: &ClientInner,
    pool: &Arc<ClientPool>,
    connections: &[Arc<Connection>],
) {
    for conn in connections {
        let probe = inner.probe.clone();
        let pool = pool.clone();
        let conn = conn.clone();
        tokio::spawn(async move {
            if let Err(e) = probe.check(conn.url()).await {
                tracing::warn!("Background health check of {} failed: {}", conn, e);
                if let Err(e) = pool.on_failure(&conn) {
                    tracing::debug!("Cannot mark {} as dead: {}", conn, e);
                }
            }
        });
    }
}

/// Run discovery every `interval` until `cancel` fires or the client goes.
pub(crate) fn spawn_discovery_loop(
    inner: Weak<ClientInner>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("No async runtime available, periodic discovery is disabled");
        return;
    };

    let task = async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = inner.upgrade() else {
                break;
            };
            // Failures are logged by discover_nodes.
            let _ = discover_nodes(&inner).await;
        }
        tracing::debug!("Discovery loop stopped");
    };
    handle.spawn(task.instrument(configure_component_tracing("discovery")));
}

/// Run one discovery in the background.
pub(crate) fn spawn_discovery(inner: Weak<ClientInner>) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("No async runtime available, skipping discovery on start");
        return;
    };

    let task = async move {
        if let Some(inner) = inner.upgrade() {
            let _ = discover_nodes(&inner).await;
        }
    };
    handle.spawn(task.instrument(configure_component_tracing("discovery")));
}
