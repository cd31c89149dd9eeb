use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
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

/// Tries sub-policies in order; the first pool or error wins.
pub struct PolicyChain {
    policies: Vec<SharedPolicy>,
    enabled: AtomicBool,
}

impl PolicyChain {
    pub fn new(policies: Vec<SharedPolicy>) -> Self {
        let enabled = policies.iter().any(|p| p.is_enabled());
        Self {
            policies,
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn policies(&self) -> &[SharedPolicy] {
        &self.policies
    }
}

#[async_trait]
impl Policy for PolicyChain {
    /// Leaves first: walk in reverse so composites later in the list see
    /// fresh flags from the policies they wrap.
    fn discovery_update(
        &self,
        added: &[Arc<Connection>],
        removed: &[Arc<Connection>],
        unchanged: &[Arc<Connection>],
    ) {
        for policy in self.policies.iter().rev() {
            policy.discovery_update(added, removed, unchanged);
        }
        let enabled = self.policies.iter().any(|p| p.is_enabled());
        self.enabled.store(enabled, Ordering::Release);
    }

    async fn check_dead(&self, health_check: &dyn HealthCheck) {
        for policy in &self.policies {
            policy.check_dead(health_check).await;
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn eval(&self, req: &Request) -> Result<Option<Arc<StatusPool>>, PolicyError> {
        for policy in &self.policies {
            if !policy.is_enabled() {
                continue;
            }
            if let Some(pool) = policy.eval(req)? {
                return Ok(Some(pool));
            }
        }
        Ok(None)
    }

    fn configure_pool_factory(&self, factory: &PoolFactory) {
        for policy in &self.policies {
            policy.configure_pool_factory(factory);
        }
    }
}
