//! Request routing over a policy chain.
use std::{fmt, sync::Arc};

use crate::{
    core::{
        connection::Connection,
        policy::{
            CoordinatorPolicy, IfEnabledPolicy, NullPolicy, Policy, PolicyChain, PolicyError,
            RoundRobinPolicy, SharedPolicy,
        },
        pool::{ConnectionPool, PoolFactory, StatusPool},
        routes::smart_routes,
    },
    ports::{HealthCheck, Request},
};

/// The pool a request was routed to, plus the connection drawn from it.
pub struct Selection {
    pub pool: Arc<StatusPool>,
    pub connection: Arc<Connection>,
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("connection", &self.connection.url().as_str())
            .finish_non_exhaustive()
    }
}

/// Ordered list of policies tried per request.
pub struct Router {
    chain: PolicyChain,
}

impl Router {
    pub fn new(policies: Vec<SharedPolicy>) -> Self {
        Self {
            chain: PolicyChain::new(policies),
        }
    }

    /// Coordinating-only nodes take everything when present; otherwise
    /// round-robin over all nodes.
    pub fn default_router() -> Result<Self, PolicyError> {
        let coordinator: SharedPolicy = Arc::new(CoordinatorPolicy::new()?);
        let null: SharedPolicy = Arc::new(NullPolicy);
        let preferred: SharedPolicy = Arc::new(IfEnabledPolicy::when_enabled(
            coordinator.clone(),
            coordinator,
            null,
        ));
        let round_robin: SharedPolicy = Arc::new(RoundRobinPolicy::new());
        Ok(Self::new(vec![preferred, round_robin]))
    }

    /// Coordinating-only nodes take everything when present; otherwise the
    /// canonical route table, then round-robin.
    pub fn smart() -> Result<Self, PolicyError> {
        let coordinator: SharedPolicy = Arc::new(CoordinatorPolicy::new()?);
        let routes: SharedPolicy = Arc::new(smart_routes()?);
        let round_robin: SharedPolicy = Arc::new(RoundRobinPolicy::new());
        let fallback: SharedPolicy = Arc::new(PolicyChain::new(vec![routes, round_robin]));
        let root: SharedPolicy = Arc::new(IfEnabledPolicy::when_enabled(
            coordinator.clone(),
            coordinator,
            fallback,
        ));
        Ok(Self::new(vec![root]))
    }

    /// Pick a pool for `req` and draw a connection from it.
    pub fn route(&self, req: &Request) -> Result<Selection, PolicyError> {
        for policy in self.chain.policies() {
            if !policy.is_enabled() {
                continue;
            }
            if let Some(pool) = policy.eval(req)? {
                let connection = pool.next()?;
                return Ok(Selection { pool, connection });
            }
        }
        Err(PolicyError::NoConnection)
    }

    pub fn discovery_update(
        &self,
        added: &[Arc<Connection>],
        removed: &[Arc<Connection>],
        unchanged: &[Arc<Connection>],
    ) {
        self.chain.discovery_update(added, removed, unchanged);
    }

    pub async fn check_dead(&self, health_check: &dyn HealthCheck) {
        self.chain.check_dead(health_check).await;
    }

    pub fn is_enabled(&self) -> bool {
        self.chain.is_enabled()
    }

    pub fn configure_pool_factory(&self, factory: &PoolFactory) {
        self.chain.configure_pool_factory(factory);
    }
}
