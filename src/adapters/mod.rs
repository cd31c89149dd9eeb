pub mod hyper_transport;
pub mod tracing_logger;

/// Re-export commonly used types from adapters
pub use hyper_transport::HyperTransport;
pub use tracing_logger::TracingLogger;
