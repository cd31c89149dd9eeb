//! Crate-level error type.
use thiserror::Error;

use crate::{
    config::ValidationError,
    core::{connection::ConnectionError, policy::PolicyError, pool::PoolError},
    ports::{HealthCheckError, SignError, TransportError},
};

/// Result alias used by the public API
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the client
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Bad options at construction time
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Neither the router nor the pool had a connection to offer
    #[error("cannot get connection: {0}")]
    NoConnection(String),

    /// The request signer failed; the request was not sent
    #[error("failed to sign request: {0}")]
    Sign(#[source] SignError),

    /// The last attempt failed at the network level
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request's cancellation token fired during a retry backoff
    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    HealthCheck(#[from] HealthCheckError),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("metrics are disabled")]
    MetricsDisabled,

    /// Reading or compressing a body failed
    #[error("body error: {0}")]
    Body(String),
}

impl Error {
    /// Whether the error came from the round-tripper.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Configuration(err.to_string())
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Configuration(err.to_string())
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::NoConnection(err.to_string())
    }
}

impl From<PolicyError> for Error {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::NoConnection | PolicyError::Pool(_) => {
                Error::NoConnection(err.to_string())
            }
            other => Error::Configuration(other.to_string()),
        }
    }
}
