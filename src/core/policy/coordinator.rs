use std::sync::Arc;

use async_trait::async_trait;

use super::{Policy, PolicyError, RolePolicy};
use crate::{
    core::{
        connection::{Connection, ROLE_COORDINATING_ONLY},
        pool::{PoolFactory, StatusPool},
    },
    ports::{HealthCheck, Request},
};

/// Routes to coordinating-only nodes: explicit `coordinating_only` or no roles.
pub struct CoordinatorPolicy {
    role: RolePolicy,
}

impl CoordinatorPolicy {
    pub fn new() -> Result<Self, PolicyError> {
        Ok(Self {
            role: RolePolicy::new([ROLE_COORDINATING_ONLY])?,
        })
    }

    pub fn pool(&self) -> Arc<StatusPool> {
        self.role.pool()
    }
}

#[async_trait]
impl Policy for CoordinatorPolicy {
    fn discovery_update(
        &self,
        added: &[Arc<Connection>],
        removed: &[Arc<Connection>],
        unchanged: &[Arc<Connection>],
    ) {
        self.role.discovery_update(added, removed, unchanged);
    }

    async fn check_dead(&self, health_check: &dyn HealthCheck) {
        self.role.check_dead(health_check).await;
    }

    fn is_enabled(&self) -> bool {
        self.role.is_enabled()
    }

    fn eval(&self, req: &Request) -> Result<Option<Arc<StatusPool>>, PolicyError> {
        self.role.eval(req)
    }

    fn configure_pool_factory(&self, factory: &PoolFactory) {
        self.role.configure_pool_factory(factory);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use url::Url;

    use super::*;
    use crate::core::connection::RoleSet;

    #[test]
    fn test_coordinator_enabled_only_with_coordinating_nodes() {
        let policy = CoordinatorPolicy::new().unwrap();
        let data = Arc::new(Connection::with_metadata(
            Url::parse("http://data").unwrap(),
            "d1".into(),
            "data".into(),
            RoleSet::new(["data"]),
            HashMap::new(),
        ));
        policy.discovery_update(&[data], &[], &[]);
        assert!(!policy.is_enabled());

        let coord = Arc::new(Connection::with_metadata(
            Url::parse("http://coord").unwrap(),
            "c1".into(),
            "coord".into(),
            RoleSet::new(["coordinating_only"]),
            HashMap::new(),
        ));
        policy.discovery_update(&[coord], &[], &[]);
        assert!(policy.is_enabled());
        assert_eq!(policy.pool().len(), 1);
    }
}
