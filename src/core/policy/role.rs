use std::sync::Arc;

use async_trait::async_trait;

use super::{Policy, PolicyError, PolicyPool, ROLE_SEPARATOR};
use crate::{
    core::{
        connection::{Connection, ROLE_COORDINATING_ONLY},
        pool::{PoolFactory, StatusPool},
    },
    ports::{HealthCheck, Request},
};

/// Canonical form of a role list: trimmed, deduplicated and sorted.
///
/// Idempotent and independent of input order. Fails on an empty list and on
/// roles that are blank or contain the key separator.
pub fn normalize_roles<I, S>(roles: I) -> Result<Vec<String>, PolicyError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized = Vec::new();
    for role in roles {
        let role = role.as_ref().trim();
        if role.is_empty() || role.contains(ROLE_SEPARATOR) {
            return Err(PolicyError::InvalidRole(role.to_string()));
        }
        normalized.push(role.to_string());
    }

    if normalized.is_empty() {
        return Err(PolicyError::EmptyRoles);
    }

    normalized.sort();
    normalized.dedup();
    Ok(normalized)
}

/// Join normalized roles into the pool key.
pub fn role_key(roles: &[String]) -> String {
    roles.join(ROLE_SEPARATOR)
}

/// Routes to nodes carrying every required role.
pub struct RolePolicy {
    roles: Vec<String>,
    key: String,
    inner: PolicyPool,
}

impl RolePolicy {
    pub fn new<I, S>(roles: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let roles = normalize_roles(roles)?;
        let key = role_key(&roles);
        Ok(Self {
            roles,
            key,
            inner: PolicyPool::new(),
        })
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn pool(&self) -> Arc<StatusPool> {
        self.inner.pool()
    }

    /// Superset match; `coordinating_only` also accepts role-less nodes.
    pub fn matches(&self, conn: &Connection) -> bool {
        let roles = conn.roles();
        self.roles.iter().all(|required| {
            if required == ROLE_COORDINATING_ONLY {
                roles.is_coordinating_only()
            } else {
                roles.contains(required)
            }
        })
    }
}

#[async_trait]
impl Policy for RolePolicy {
    fn discovery_update(
        &self,
        added: &[Arc<Connection>],
        removed: &[Arc<Connection>],
        unchanged: &[Arc<Connection>],
    ) {
        self.inner
            .update(added, removed, unchanged, |conn| self.matches(conn));
        tracing::debug!(
            "Role policy [{}] now holds {} connections",
            self.key,
            self.inner.pool().len()
        );
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
