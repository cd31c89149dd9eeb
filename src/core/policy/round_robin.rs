use std::sync::Arc;

use async_trait::async_trait;

use super::{Policy, PolicyError, PolicyPool};
use crate::{
    core::{
        connection::Connection,
        pool::{PoolFactory, StatusPool},
    },
    ports::{HealthCheck, Request},
};

/// Routes to every known node.
///
/// New nodes join the pool's dead list and become routable once a health
/// check or a request proves them live.
pub struct RoundRobinPolicy {
    inner: PolicyPool,
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self {
            inner: PolicyPool::new(),
        }
    }

    pub fn pool(&self) -> Arc<StatusPool> {
        self.inner.pool()
    }
}

#[async_trait]
impl Policy for RoundRobinPolicy {
    fn discovery_update(
        &self,
        added: &[Arc<Connection>],
        removed: &[Arc<Connection>],
        unchanged: &[Arc<Connection>],
    ) {
        self.inner.update(added, removed, unchanged, |_| true);
    }

    async fn check_dead(&self, health_check: &dyn HealthCheck) {
        self.inner.check_dead(health_check).await;
    }

    fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    fn eval(&self, _req: &Request) -> Result<Option<Arc<StatusPool>>, PolicyError> {
        if !self.inner.is_enabled() {
            return Ok(None);
        }
        Ok(Some(self.inner.pool()))
    }

    fn configure_pool_factory(&self, factory: &PoolFactory) {
        self.inner.configure(factory);
    }
}
