use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;

use super::{Policy, PolicyError, SharedPolicy};
use crate::{
    core::{
        connection::Connection,
        pool::{PoolFactory, StatusPool},
    },
    ports::{HealthCheck, Request},
};

/// Request-time predicate of an [`IfEnabledPolicy`].
pub type Condition = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Picks one of two policies per request.
pub struct IfEnabledPolicy {
    condition: Condition,
    when_true: SharedPolicy,
    when_false: SharedPolicy,
    enabled: AtomicBool,
}

impl IfEnabledPolicy {
    pub fn new<F>(condition: F, when_true: SharedPolicy, when_false: SharedPolicy) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        let enabled = when_true.is_enabled() || when_false.is_enabled();
        Self {
            condition: Arc::new(condition),
            when_true,
            when_false,
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Take `when_true` while `probe` is enabled, `when_false` otherwise.
    pub fn when_enabled(
        probe: SharedPolicy,
        when_true: SharedPolicy,
        when_false: SharedPolicy,
    ) -> Self {
        Self::new(move |_| probe.is_enabled(), when_true, when_false)
    }
}

impl fmt::Debug for IfEnabledPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IfEnabledPolicy")
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Policy for IfEnabledPolicy {
    fn discovery_update(
        &self,
        added: &[Arc<Connection>],
        removed: &[Arc<Connection>],
        unchanged: &[Arc<Connection>],
    ) {
        self.when_true.discovery_update(added, removed, unchanged);
        self.when_false.discovery_update(added, removed, unchanged);
        let enabled = self.when_true.is_enabled() || self.when_false.is_enabled();
        self.enabled.store(enabled, Ordering::Release);
    }

    async fn check_dead(&self, health_check: &dyn HealthCheck) {
        self.when_true.check_dead(health_check).await;
        self.when_false.check_dead(health_check).await;
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn eval(&self, req: &Request) -> Result<Option<Arc<StatusPool>>, PolicyError> {
        if (self.condition)(req) {
            self.when_true.eval(req)
        } else {
            self.when_false.eval(req)
        }
    }

    fn configure_pool_factory(&self, factory: &PoolFactory) {
        self.when_true.configure_pool_factory(factory);
        self.when_false.configure_pool_factory(factory);
    }
}
