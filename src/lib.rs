//! Cluster Transport - a client-side HTTP transport for search clusters.
//!
//! The crate sits between an API client and the cluster. It keeps a pool of
//! node connections, routes each request to a node whose roles fit the
//! endpoint, retries transient failures against other nodes and refreshes
//! the node list from the cluster itself.
//!
//! # Features
//! - Single-node and multi-node pools with live / dead partitions and
//!   exponential resurrection backoff
//! - Round-robin and random node selection
//! - Role-aware routing: a default router preferring coordinating-only nodes
//!   and a smart router sending bulk to ingest nodes, searches to search /
//!   data nodes and searchable-snapshot calls to warm nodes
//! - Node discovery through `/_nodes/http`, periodic or on demand
//! - Retries on network errors and configurable status codes, with replayable
//!   (optionally gzip compressed) request bodies
//! - Basic auth, global headers, custom CA certificates and request signing
//! - Request metrics and structured tracing via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use axum::body::Body;
//! use cluster_transport::{Client, Router};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = cluster_transport::config::load_config(Some("transport.toml")).await?;
//! let client = Client::builder()
//!     .urls(config.urls.clone())
//!     .router(Router::smart()?)
//!     .build()?;
//!
//! let request = http::Request::post("/_bulk").body(Body::from("..."))?;
//! let response = client.perform(request).await?;
//! println!("{}", response.status());
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits for the round-tripper, logger,
//! signer and health check) from **adapters** (the hyper based transport and
//! the `tracing` logger) while keeping pools, policies and the perform loop
//! inside `core`. End users should prefer the re-exports documented below.
//!
//! # Error Handling
//! Library APIs return [`Result<T>`] with the crate [`Error`]. Configuration
//! loading and the binary use `eyre` with `WrapErr` context.
//!
//! # Concurrency
//! Pool and connection locks are synchronous and never held across an
//! `.await`; the pool lock is always taken before a connection lock. The
//! active pool is swapped atomically with `arc-swap`.
pub mod config;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HyperTransport, TracingLogger},
    config::{Settings, TransportConfig},
    core::{
        Client, ClientBuilder, Connection, RetryBackoff, RoleSet, Router, Selection,
        metrics::MetricsSnapshot,
    },
    error::{Error, Result},
    ports::{
        GetBody, HealthCheck, NoOpHealthCheck, Request, Response, RoundTripLogger, RoundTripper,
        Signer, TransportError,
    },
};
