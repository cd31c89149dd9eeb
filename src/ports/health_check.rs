use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::ports::transport::{Response, TransportError};

/// Reasons a node probe can fail.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum HealthCheckError {
    #[error("health check request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("health check returned status {0}")]
    UnexpectedStatus(u16),

    #[error("health check response is malformed: {0}")]
    InvalidResponse(String),

    #[error("health check timed out")]
    Timeout,
}

/// Port for probing a node.
///
/// `Ok(None)` means healthy without a response to show (see [`NoOpHealthCheck`]).
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    async fn check(&self, url: &Url) -> Result<Option<Response>, HealthCheckError>;
}

/// Health check that always succeeds without touching the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHealthCheck;

#[async_trait]
impl HealthCheck for NoOpHealthCheck {
    async fn check(&self, _url: &Url) -> Result<Option<Response>, HealthCheckError> {
        Ok(None)
    }
}
