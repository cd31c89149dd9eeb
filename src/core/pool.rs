//! Connection pools.
//!
//! [`SinglePool`] wraps the only known node and does no liveness bookkeeping.
//! [`StatusPool`] keeps an ordered `live` / `dead` partition: failures move a
//! connection to `dead` (kept sorted by failure count, highest first) and
//! schedule a resurrection after an exponential backoff.
//!
//! Lock order: the pool lock is always acquired before a connection lock.
use std::{
    cmp::Reverse,
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::RwLock;
use thiserror::Error;
use url::Url;

use crate::core::{
    connection::{Connection, ConnectionState},
    metrics::Metrics,
    selector::{RoundRobinSelector, Selector},
};

pub const DEFAULT_RESURRECT_TIMEOUT_INITIAL: Duration = Duration::from_secs(60);
pub const DEFAULT_RESURRECT_TIMEOUT_FACTOR_CUTOFF: u32 = 5;

/// Errors returned by pool operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolError {
    #[error("no connection available")]
    NoConnection,

    #[error("connection {0} not found in live list")]
    NotInLive(String),
}

/// Operations every pool offers to the perform loop.
pub trait ConnectionPool: Send + Sync + 'static {
    /// Pick the connection for the next attempt.
    fn next(&self) -> Result<Arc<Connection>, PoolError>;

    /// Feedback after a round-trip that produced a response.
    fn on_success(&self, conn: &Arc<Connection>);

    /// Feedback after a round-trip that failed at the network level.
    fn on_failure(&self, conn: &Arc<Connection>) -> Result<(), PoolError>;

    /// URLs of routable connections.
    fn urls(&self) -> Vec<Url>;

    /// Every connection known to the pool, live and dead.
    fn connections(&self) -> Vec<Arc<Connection>>;
}

/// Tuning shared by status pools.
#[derive(Clone)]
pub struct PoolSettings {
    pub resurrect_timeout_initial: Duration,
    pub resurrect_timeout_factor_cutoff: u32,
    pub metrics: Option<Arc<Metrics>>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            resurrect_timeout_initial: DEFAULT_RESURRECT_TIMEOUT_INITIAL,
            resurrect_timeout_factor_cutoff: DEFAULT_RESURRECT_TIMEOUT_FACTOR_CUTOFF,
            metrics: None,
        }
    }
}

impl fmt::Debug for PoolSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolSettings")
            .field("resurrect_timeout_initial", &self.resurrect_timeout_initial)
            .field(
                "resurrect_timeout_factor_cutoff",
                &self.resurrect_timeout_factor_cutoff,
            )
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

/// Builds the status pools used by the client and by leaf policies.
pub type PoolFactory =
    Arc<dyn Fn(Vec<Arc<Connection>>, Arc<dyn Selector>) -> StatusPool + Send + Sync>;

/// Factory producing status pools with the given settings.
pub fn pool_factory(settings: PoolSettings) -> PoolFactory {
    Arc::new(move |connections, selector| {
        StatusPool::new(connections, selector, settings.clone())
    })
}

/// `initial * 2^min(failures - 1, cutoff)`.
pub fn resurrect_timeout(initial: Duration, failures: u32, cutoff: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(cutoff).min(31);
    initial.saturating_mul(1u32 << exponent)
}

/// Pool for a single node.
pub struct SinglePool {
    connection: Arc<Connection>,
    metrics: Option<Arc<Metrics>>,
}

impl SinglePool {
    pub fn new(connection: Arc<Connection>, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            connection,
            metrics,
        }
    }

    /// Collapse a status pool to one connection, preferring a live one.
    /// The metrics handle is carried over.
    pub fn demote(pool: &StatusPool) -> Option<Self> {
        let state = pool.state.read();
        let connection = state.live.first().or_else(|| state.dead.first())?.clone();
        Some(Self {
            connection,
            metrics: pool.settings.metrics.clone(),
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }
}

impl ConnectionPool for SinglePool {
    fn next(&self) -> Result<Arc<Connection>, PoolError> {
        Ok(self.connection.clone())
    }

    fn on_success(&self, _conn: &Arc<Connection>) {}

    fn on_failure(&self, _conn: &Arc<Connection>) -> Result<(), PoolError> {
        Ok(())
    }

    fn urls(&self) -> Vec<Url> {
        vec![self.connection.url().clone()]
    }

    fn connections(&self) -> Vec<Arc<Connection>> {
        vec![self.connection.clone()]
    }
}

#[derive(Default)]
struct PoolState {
    live: Vec<Arc<Connection>>,
    dead: Vec<Arc<Connection>>,
}

impl PoolState {
    /// Flip `conn` to live and place it in `live`.
    fn resurrect(
        &mut self,
        conn: &Arc<Connection>,
        state: &mut ConnectionState,
        remove_from_dead: bool,
    ) {
        state.mark_as_live();
        if !self.live.iter().any(|c| Arc::ptr_eq(c, conn)) {
            self.live.push(conn.clone());
        }
        if remove_from_dead {
            self.dead.retain(|c| !Arc::ptr_eq(c, conn));
        }
    }

    fn sort_dead(&mut self) {
        self.dead.sort_by_cached_key(|c| Reverse(c.failures()));
    }
}

/// Multi-node pool with live/dead partitioning and timed resurrection.
pub struct StatusPool {
    state: Arc<RwLock<PoolState>>,
    selector: Arc<dyn Selector>,
    settings: PoolSettings,
}

impl StatusPool {
    /// Every connection starts in `live`.
    pub fn new(
        connections: Vec<Arc<Connection>>,
        selector: Arc<dyn Selector>,
        settings: PoolSettings,
    ) -> Self {
        Self::from_partitions(connections, Vec::new(), selector, settings)
    }

    /// Build from an explicit partition. `dead` is sorted on entry and every
    /// connection in it flagged dead gets a resurrection timer.
    pub fn from_partitions(
        live: Vec<Arc<Connection>>,
        dead: Vec<Arc<Connection>>,
        selector: Arc<dyn Selector>,
        settings: PoolSettings,
    ) -> Self {
        let mut state = PoolState { live, dead };
        state.sort_dead();
        let pool = Self {
            state: Arc::new(RwLock::new(state)),
            selector,
            settings,
        };
        pool.schedule_dead(&pool.dead_connections());
        pool
    }

    /// Empty pool with a round-robin selector and default settings.
    pub fn empty() -> Self {
        Self::new(Vec::new(), RoundRobinSelector::new().shared(), PoolSettings::default())
    }

    /// Grow a single-node pool into `pool`, keeping the single pool's
    /// metrics handle.
    pub fn promote(single: &SinglePool, pool: StatusPool) -> Self {
        pool.with_metrics(single.metrics.clone())
    }

    /// Attach a metrics handle; `None` keeps the current one.
    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        if metrics.is_some() {
            self.settings.metrics = metrics;
        }
        self
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.settings.metrics.as_ref()
    }

    pub fn selector(&self) -> Arc<dyn Selector> {
        self.selector.clone()
    }

    pub fn live_connections(&self) -> Vec<Arc<Connection>> {
        self.state.read().live.clone()
    }

    pub fn dead_connections(&self) -> Vec<Arc<Connection>> {
        self.state.read().dead.clone()
    }

    pub fn len(&self) -> usize {
        let state = self.state.read();
        state.live.len() + state.dead.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_url(&self, url: &Url) -> bool {
        let state = self.state.read();
        state.live.iter().chain(state.dead.iter()).any(|c| c.url() == url)
    }

    /// Append connections to `dead` (unless already present) and re-sort.
    /// They are routable only after a resurrection, a `revive` or a `next`
    /// on an otherwise empty live list.
    ///
    /// Joining connections already flagged dead are scheduled for
    /// resurrection.
    pub fn add_dead(&self, connections: &[Arc<Connection>]) {
        let mut joined = Vec::new();
        let mut state = self.state.write();
        for conn in connections {
            let known = state
                .live
                .iter()
                .chain(state.dead.iter())
                .any(|c| Arc::ptr_eq(c, conn));
            if !known {
                state.dead.push(conn.clone());
                joined.push(conn.clone());
            }
        }
        state.sort_dead();
        drop(state);

        self.schedule_dead(&joined);
    }

    /// Move connections flagged dead out of `live` and schedule their
    /// resurrection. Returns how many moved.
    pub fn evict_dead(&self, connections: &[Arc<Connection>]) -> usize {
        let mut evicted = Vec::new();
        let mut state = self.state.write();
        for conn in connections {
            let Some(index) = state.live.iter().position(|c| Arc::ptr_eq(c, conn)) else {
                continue;
            };
            let conn_state = conn.lock();
            if !conn_state.is_dead {
                continue;
            }
            let failures = conn_state.failures;
            drop(conn_state);

            state.live.remove(index);
            if !state.dead.iter().any(|c| Arc::ptr_eq(c, conn)) {
                state.dead.push(conn.clone());
            }
            evicted.push((conn.clone(), failures));
        }
        state.sort_dead();
        drop(state);

        let count = evicted.len();
        for (conn, failures) in evicted {
            tracing::debug!("Evicted dead connection {} from live list", conn.url());
            self.schedule_resurrect(conn, failures);
        }
        count
    }

    /// Drop every connection whose URL is in `urls`. Returns how many went.
    pub fn remove_urls(&self, urls: &[&Url]) -> usize {
        let mut state = self.state.write();
        let before = state.live.len() + state.dead.len();
        state.live.retain(|c| !urls.contains(&c.url()));
        state.dead.retain(|c| !urls.contains(&c.url()));
        before - (state.live.len() + state.dead.len())
    }

    /// Mark `conn` healthy and move it to `live`, whatever its current state.
    pub fn revive(&self, conn: &Arc<Connection>) {
        let mut state = self.state.write();
        let mut conn_state = conn.lock();
        conn_state.mark_as_healthy();
        state.resurrect(conn, &mut conn_state, true);
    }

    /// Move a connection already flagged live back into `live`, keeping its
    /// failure history.
    pub fn restore(&self, conn: &Arc<Connection>) {
        let mut state = self.state.write();
        let mut conn_state = conn.lock();
        state.resurrect(conn, &mut conn_state, true);
    }

    fn schedule_dead(&self, connections: &[Arc<Connection>]) {
        for conn in connections {
            let conn_state = conn.lock();
            if !conn_state.is_dead {
                continue;
            }
            let failures = conn_state.failures;
            drop(conn_state);
            self.schedule_resurrect(conn.clone(), failures);
        }
    }

    fn schedule_resurrect(&self, conn: Arc<Connection>, failures: u32) {
        let timeout = resurrect_timeout(
            self.settings.resurrect_timeout_initial,
            failures,
            self.settings.resurrect_timeout_factor_cutoff,
        );

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(
                "No async runtime available, not scheduling resurrection of {}",
                conn.url()
            );
            return;
        };

        tracing::debug!(
            "Resurrecting {} in {:?} (failures: {})",
            conn.url(),
            timeout,
            failures
        );

        let weak: Weak<RwLock<PoolState>> = Arc::downgrade(&self.state);
        handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(state) = weak.upgrade() else {
                return;
            };
            let mut state = state.write();
            let mut conn_state = conn.lock();
            if conn_state.is_dead {
                tracing::debug!("Resurrecting connection {}", conn.url());
                state.resurrect(&conn, &mut conn_state, true);
                crate::metrics::increment_resurrections(conn.url().as_str());
            }
        });
    }
}

impl ConnectionPool for StatusPool {
    fn next(&self) -> Result<Arc<Connection>, PoolError> {
        let mut state = self.state.write();

        if let Some(conn) = self.selector.select(&state.live) {
            return Ok(conn);
        }

        if let Some(conn) = state.dead.pop() {
            let mut conn_state = conn.lock();
            state.resurrect(&conn, &mut conn_state, false);
            drop(conn_state);
            tracing::debug!("No live connections, trying dead connection {}", conn.url());
            return Ok(conn);
        }

        Err(PoolError::NoConnection)
    }

    fn on_success(&self, conn: &Arc<Connection>) {
        let mut state = self.state.write();
        let mut conn_state = conn.lock();

        if !conn_state.is_dead {
            // Resurrected connections come back with their failure history.
            if conn_state.failures > 0 {
                conn_state.mark_as_healthy();
            }
            return;
        }

        conn_state.mark_as_healthy();
        state.resurrect(conn, &mut conn_state, true);
        tracing::debug!("Connection {} is healthy again", conn.url());
    }

    fn on_failure(&self, conn: &Arc<Connection>) -> Result<(), PoolError> {
        let mut state = self.state.write();
        let mut conn_state = conn.lock();

        if conn_state.is_dead {
            tracing::debug!("Connection {} already marked as dead", conn.url());
            return Ok(());
        }

        conn_state.mark_as_dead();
        let failures = conn_state.failures;
        drop(conn_state);

        let already_dead = state.dead.iter().any(|c| Arc::ptr_eq(c, conn));
        if !already_dead {
            state.dead.push(conn.clone());
        }
        state.sort_dead();

        match state.live.iter().position(|c| Arc::ptr_eq(c, conn)) {
            Some(index) => {
                state.live.remove(index);
            }
            None if already_dead => {}
            None => return Err(PoolError::NotInLive(conn.url().to_string())),
        }
        drop(state);

        tracing::debug!(
            "Marked connection {} as dead (failures: {})",
            conn.url(),
            failures
        );
        self.schedule_resurrect(conn.clone(), failures);
        Ok(())
    }

    fn urls(&self) -> Vec<Url> {
        self.state
            .read()
            .live
            .iter()
            .map(|c| c.url().clone())
            .collect()
    }

    fn connections(&self) -> Vec<Arc<Connection>> {
        let state = self.state.read();
        state.live.iter().chain(state.dead.iter()).cloned().collect()
    }
}

/// The pool owned by the client: single-node or status form.
pub enum ClientPool {
    Single(SinglePool),
    Status(StatusPool),
}

impl ClientPool {
    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        match self {
            ClientPool::Single(pool) => pool.metrics(),
            ClientPool::Status(pool) => pool.metrics(),
        }
    }

    fn inner(&self) -> &dyn ConnectionPool {
        match self {
            ClientPool::Single(pool) => pool,
            ClientPool::Status(pool) => pool,
        }
    }
}

impl ConnectionPool for ClientPool {
    fn next(&self) -> Result<Arc<Connection>, PoolError> {
        self.inner().next()
    }

    fn on_success(&self, conn: &Arc<Connection>) {
        self.inner().on_success(conn)
    }

    fn on_failure(&self, conn: &Arc<Connection>) -> Result<(), PoolError> {
        self.inner().on_failure(conn)
    }

    fn urls(&self) -> Vec<Url> {
        self.inner().urls()
    }

    fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner().connections()
    }
}
