pub mod client;
pub mod connection;
pub mod discovery;
pub mod gzip;
pub mod health;
pub mod metrics;
mod perform;
pub mod policy;
pub mod pool;
pub mod request;
pub mod router;
pub mod routes;
pub mod selector;

pub use client::{Client, ClientBuilder, RetryBackoff};
pub use connection::{Connection, RoleSet};
pub use router::{Router, Selection};
