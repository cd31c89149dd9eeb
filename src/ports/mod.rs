//! Ports: the traits the transport core talks to.
pub mod health_check;
pub mod logger;
pub mod signer;
pub mod transport;

pub use health_check::{HealthCheck, HealthCheckError, NoOpHealthCheck};
pub use logger::{RoundTripLogger, RoundTripRecord};
pub use signer::{SignError, Signer};
pub use transport::{GetBody, Request, Response, RoundTripper, TransportError, TransportResult};
