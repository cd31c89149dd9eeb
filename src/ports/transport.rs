use std::{fmt, io, sync::Arc};

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use http_body::Body as _;
use thiserror::Error;

/// Request type flowing through the transport.
pub type Request = http::Request<Body>;

/// Response type returned by the transport.
pub type Response = http::Response<Body>;

/// Errors produced by a [`RoundTripper`].
///
/// The variant decides how the perform loop classifies the failure for retry
/// purposes: `UnexpectedEof` and `Connection` are retried, `Timeout` only when
/// retry-on-timeout is enabled, `InvalidRequest` never.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// The peer closed the connection before a full response was read
    #[error("unexpected EOF")]
    UnexpectedEof,

    /// Network-level failure that is not a timeout
    #[error("connection error: {0}")]
    Connection(String),

    /// The round-trip did not complete in time
    #[error("timeout: {0}")]
    Timeout(String),

    /// The request could not be sent at all
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether the error counts as a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }

    /// Whether a retry may help, ignoring timeout configuration.
    pub fn is_retriable_network_error(&self) -> bool {
        matches!(
            self,
            TransportError::UnexpectedEof | TransportError::Connection(_)
        )
    }

    /// Classify an I/O error the way round-trippers report them.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => TransportError::UnexpectedEof,
            io::ErrorKind::TimedOut => TransportError::Timeout(err.to_string()),
            _ => TransportError::Connection(err.to_string()),
        }
    }
}

/// Result type alias for round-trip operations
pub type TransportResult<T> = Result<T, TransportError>;

/// RoundTripper is the port for executing a single HTTP exchange.
///
/// Implementations must honour cancellation by dropping: when the perform
/// future is dropped the in-flight round-trip future is dropped with it.
#[async_trait]
pub trait RoundTripper: Send + Sync + 'static {
    /// Send one request and return the response head with a streaming body.
    async fn round_trip(&self, req: Request) -> TransportResult<Response>;
}

/// Replay source for a request body.
///
/// Stored in the request extensions. Each call yields a fresh body over the
/// same bytes, so every retry attempt starts at position zero.
#[derive(Clone)]
pub struct GetBody(Arc<dyn Fn() -> Body + Send + Sync>);

impl GetBody {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Body + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Replay source over an in-memory buffer.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::new(move || Body::from(bytes.clone()))
    }

    /// Produce a new body.
    pub fn body(&self) -> Body {
        (self.0)()
    }
}

impl fmt::Debug for GetBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GetBody(..)")
    }
}

/// True for an absent or zero-length body.
pub fn is_empty_body(body: &Body) -> bool {
    body.is_end_stream() || body.size_hint().exact() == Some(0)
}
