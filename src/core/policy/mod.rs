//! Routing policies.
//!
//! A policy maps a request to the pool it should draw a connection from.
//! Leaf policies own a [`StatusPool`]; composite policies delegate to
//! sub-policies. `eval` returning `Ok(None)` means "not applicable, try the
//! next policy". Discovery pushes topology deltas down through
//! `discovery_update`; cached `is_enabled` flags are refreshed there.
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::{
    core::{
        connection::Connection,
        pool::{ConnectionPool, PoolError, PoolFactory, StatusPool},
    },
    ports::{HealthCheck, Request},
};

pub mod chain;
pub mod coordinator;
pub mod if_enabled;
pub mod mux;
pub mod null;
pub mod role;
pub mod round_robin;

pub use chain::PolicyChain;
pub use coordinator::CoordinatorPolicy;
pub use if_enabled::{Condition, IfEnabledPolicy};
pub use mux::MuxPolicy;
pub use null::NullPolicy;
pub use role::{RolePolicy, normalize_roles, role_key};
pub use round_robin::RoundRobinPolicy;

/// Reserved separator of role keys.
pub const ROLE_SEPARATOR: &str = ",";

/// Errors from policy construction and evaluation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PolicyError {
    #[error("invalid role {0:?}: roles must be non-empty and must not contain ','")]
    InvalidRole(String),

    #[error("a role policy needs at least one role")]
    EmptyRoles,

    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("no connections available")]
    NoConnection,

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// A routing strategy.
#[async_trait]
pub trait Policy: Send + Sync + 'static {
    /// Apply a topology delta computed by discovery.
    fn discovery_update(
        &self,
        added: &[Arc<Connection>],
        removed: &[Arc<Connection>],
        unchanged: &[Arc<Connection>],
    );

    /// Probe dead connections and move the healthy ones back to live.
    async fn check_dead(&self, health_check: &dyn HealthCheck);

    /// Cached: does this policy currently have any routable connection?
    fn is_enabled(&self) -> bool;

    /// The pool to draw from, or `None` to let the next policy decide.
    fn eval(&self, req: &Request) -> Result<Option<Arc<StatusPool>>, PolicyError>;

    /// Rebuild owned pools with `factory`. Composite policies forward this
    /// to their sub-policies; policies without a pool ignore it.
    fn configure_pool_factory(&self, _factory: &PoolFactory) {}
}

/// Shared handle to a policy.
pub type SharedPolicy = Arc<dyn Policy>;

/// Identity comparison for policy handles.
pub(crate) fn same_policy(a: &SharedPolicy, b: &SharedPolicy) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Pool plus enabled flag, shared by the leaf policies.
pub(crate) struct PolicyPool {
    pool: ArcSwap<StatusPool>,
    enabled: AtomicBool,
}

impl PolicyPool {
    pub(crate) fn new() -> Self {
        Self {
            pool: ArcSwap::from_pointee(StatusPool::empty()),
            enabled: AtomicBool::new(false),
        }
    }

    pub(crate) fn pool(&self) -> Arc<StatusPool> {
        self.pool.load_full()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Swap in a factory-built pool holding the same connections.
    pub(crate) fn configure(&self, factory: &PoolFactory) {
        let current = self.pool.load_full();
        let rebuilt = factory(Vec::new(), current.selector());
        rebuilt.add_dead(&current.connections());
        self.pool.store(Arc::new(rebuilt));
        self.refresh_enabled();
    }

    /// Removed connections leave by URL; accepted new ones join `dead`.
    /// Known connections that discovery found dead are moved out of `live`.
    pub(crate) fn update<F>(
        &self,
        added: &[Arc<Connection>],
        removed: &[Arc<Connection>],
        unchanged: &[Arc<Connection>],
        accepts: F,
    ) where
        F: Fn(&Connection) -> bool,
    {
        let pool = self.pool.load_full();

        if !removed.is_empty() {
            let urls: Vec<&Url> = removed.iter().map(|c| c.url()).collect();
            pool.remove_urls(&urls);
        }

        let accepted: Vec<Arc<Connection>> = added
            .iter()
            .chain(unchanged.iter())
            .filter(|c| accepts(c))
            .cloned()
            .collect();
        pool.add_dead(&accepted);

        let evicted = pool.evict_dead(unchanged);
        if evicted > 0 {
            tracing::debug!("Moved {} connections found dead by discovery to dead", evicted);
        }

        self.refresh_enabled();
    }

    /// Walk `dead`: connections already proven live elsewhere move straight
    /// back, the rest are probed.
    pub(crate) async fn check_dead(&self, health_check: &dyn HealthCheck) {
        let pool = self.pool.load_full();
        for conn in pool.dead_connections() {
            if !conn.is_dead() {
                pool.restore(&conn);
                continue;
            }
            match health_check.check(conn.url()).await {
                Ok(_) => {
                    tracing::debug!("Dead connection {} passed health check", conn.url());
                    pool.revive(&conn);
                }
                Err(err) => {
                    tracing::debug!("Dead connection {} still unhealthy: {}", conn.url(), err);
                }
            }
        }
    }

    fn refresh_enabled(&self) {
        let has_connections = !self.pool.load().is_empty();
        self.enabled.store(has_connections, Ordering::Release);
    }
}
