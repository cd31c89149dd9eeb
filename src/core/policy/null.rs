use std::sync::Arc;

use async_trait::async_trait;

use super::{Policy, PolicyError};
use crate::{
    core::{connection::Connection, pool::StatusPool},
    ports::{HealthCheck, Request},
};

/// Explicit terminator: never routes, always enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPolicy;

impl NullPolicy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Policy for NullPolicy {
    fn discovery_update(
        &self,
        _added: &[Arc<Connection>],
        _removed: &[Arc<Connection>],
        _unchanged: &[Arc<Connection>],
    ) {
    }

    async fn check_dead(&self, _health_check: &dyn HealthCheck) {}

    fn is_enabled(&self) -> bool {
        true
    }

    fn eval(&self, _req: &Request) -> Result<Option<Arc<StatusPool>>, PolicyError> {
        Ok(None)
    }
}
