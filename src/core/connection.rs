//! Per-node connection records and node role sets.
//!
//! A [`Connection`] is the client-side view of one cluster node. Its identity
//! (URL, id, name, roles, attributes) never changes after creation; liveness
//! bookkeeping lives behind a per-connection mutex. When a pool is involved
//! the pool lock is always taken first and the connection lock second.
use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;
use url::Url;

pub const ROLE_DATA: &str = "data";
pub const ROLE_INGEST: &str = "ingest";
pub const ROLE_CLUSTER_MANAGER: &str = "cluster_manager";
pub const ROLE_REMOTE_CLUSTER_CLIENT: &str = "remote_cluster_client";
pub const ROLE_SEARCH: &str = "search";
pub const ROLE_WARM: &str = "warm";
pub const ROLE_ML: &str = "ml";
pub const ROLE_COORDINATING_ONLY: &str = "coordinating_only";
/// Deprecated alias of [`ROLE_CLUSTER_MANAGER`].
pub const ROLE_MASTER: &str = "master";

/// Roles that make a cluster manager node also serve client traffic.
pub const WORK_ROLES: [&str; 5] = [ROLE_DATA, ROLE_INGEST, ROLE_WARM, ROLE_SEARCH, ROLE_ML];

/// Errors related to connection construction
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConnectionError {
    /// Error when URL is invalid
    #[error("Invalid node URL: {0}")]
    InvalidUrl(String),
}

/// Set of node roles with O(1) membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet {
    roles: HashSet<String>,
}

impl RoleSet {
    /// Build a role set; `master` implicitly adds `cluster_manager`.
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = HashSet::new();
        for role in roles {
            let role = role.into();
            if role == ROLE_MASTER {
                set.insert(ROLE_CLUSTER_MANAGER.to_string());
            }
            set.insert(role);
        }
        Self { roles: set }
    }

    pub fn contains(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    /// True if every role in `required` is present.
    pub fn is_superset_of<'a, I>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        required.into_iter().all(|role| self.contains(role))
    }

    /// `cluster_manager` without any work role.
    pub fn is_dedicated_cluster_manager(&self) -> bool {
        self.contains(ROLE_CLUSTER_MANAGER) && !WORK_ROLES.iter().any(|r| self.contains(r))
    }

    /// Explicit `coordinating_only`, or no roles at all.
    pub fn is_coordinating_only(&self) -> bool {
        self.is_empty() || self.contains(ROLE_COORDINATING_ONLY)
    }
}

/// Mutable liveness state of a connection.
#[derive(Debug, Default, Clone)]
pub struct ConnectionState {
    pub is_dead: bool,
    pub dead_since: Option<DateTime<Utc>>,
    pub failures: u32,
}

impl ConnectionState {
    /// Flag as dead, stamp the first failure time and bump the failure count.
    pub fn mark_as_dead(&mut self) {
        self.is_dead = true;
        if self.dead_since.is_none() {
            self.dead_since = Some(Utc::now());
        }
        self.failures = self.failures.saturating_add(1);
    }

    /// Flag as live, keeping the failure history.
    pub fn mark_as_live(&mut self) {
        self.is_dead = false;
    }

    /// Flag as live and forget the failure history.
    pub fn mark_as_healthy(&mut self) {
        self.is_dead = false;
        self.dead_since = None;
        self.failures = 0;
    }
}

/// The client-side record of one cluster node.
#[derive(Debug)]
pub struct Connection {
    url: Url,
    id: String,
    name: String,
    roles: RoleSet,
    attributes: HashMap<String, String>,
    state: Mutex<ConnectionState>,
}

impl Connection {
    /// Create a connection for a seed URL (no id, name or roles known yet).
    pub fn new(url: Url) -> Self {
        Self::with_metadata(url, String::new(), String::new(), RoleSet::default(), HashMap::new())
    }

    /// Parse and validate a seed URL.
    pub fn parse(url: &str) -> Result<Self, ConnectionError> {
        let parsed = Url::parse(url)
            .map_err(|e| ConnectionError::InvalidUrl(format!("{url}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ConnectionError::InvalidUrl(format!(
                "Node URL must start with http:// or https://, got: {url}"
            )));
        }
        if parsed.host_str().is_none() {
            return Err(ConnectionError::InvalidUrl(format!("{url}: missing host")));
        }
        Ok(Self::new(parsed))
    }

    /// Create a connection from discovered node metadata.
    pub fn with_metadata(
        url: Url,
        id: String,
        name: String,
        roles: RoleSet,
        attributes: HashMap<String, String>,
    ) -> Self {
        Self {
            url,
            id,
            name,
            roles,
            attributes,
            state: Mutex::new(ConnectionState::default()),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Acquire the connection lock. Callers that also hold a pool lock must
    /// have taken it first.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock()
    }

    pub fn is_dead(&self) -> bool {
        self.state.lock().is_dead
    }

    pub fn failures(&self) -> u32 {
        self.state.lock().failures
    }

    pub fn dead_since(&self) -> Option<DateTime<Utc>> {
        self.state.lock().dead_since
    }

    /// Copy of the liveness state.
    pub fn state(&self) -> ConnectionState {
        self.state.lock().clone()
    }

    pub fn mark_as_dead(&self) {
        self.state.lock().mark_as_dead();
    }

    pub fn mark_as_live(&self) {
        self.state.lock().mark_as_live();
    }

    pub fn mark_as_healthy(&self) {
        self.state.lock().mark_as_healthy();
    }

    pub fn is_dedicated_cluster_manager(&self) -> bool {
        self.roles.is_dedicated_cluster_manager()
    }

    /// Same node as `other`: URL, id and roles all match.
    pub fn same_node(&self, other: &Connection) -> bool {
        self.url == other.url && self.id == other.id && self.roles == other.roles
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.url)
        } else {
            write!(f, "{} ({})", self.name, self.url)
        }
    }
}
