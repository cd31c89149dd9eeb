//! Configuration data structures for the transport.
//!
//! [`TransportConfig`] maps directly to YAML / JSON / TOML files and keeps the
//! sentinel encodings of the file format (`0` = default, negative = off).
//! [`Settings`] is the resolved form the client runs on.
use std::{collections::HashMap, fmt, time::Duration};

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_URL: &str = "http://localhost:9200";
pub const DEFAULT_MAX_RETRIES: u32 = 6;
pub const DEFAULT_RETRY_ON_STATUS: [u16; 3] = [502, 503, 504];
pub const DEFAULT_DISCOVERY_HEALTH_CHECK_RETRIES: u32 = 3;
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HEALTH_CHECK_MAX_RETRIES: u32 = 6;
pub const DEFAULT_HEALTH_CHECK_JITTER: f64 = 0.1;
pub const DEFAULT_RESURRECT_TIMEOUT_INITIAL_SECS: u64 = 60;
pub const DEFAULT_RESURRECT_TIMEOUT_FACTOR_CUTOFF: u32 = 5;

/// Connection selection strategy of status pools
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    #[default]
    RoundRobin,
    Random,
}

/// Which router preset to install
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouterKind {
    /// No router: requests go straight to the client pool
    #[default]
    None,
    /// Coordinating-only nodes first, then round-robin
    Default,
    /// Coordinating-only nodes first, then the role-aware route table
    Smart,
}

/// File-level transport configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    /// Seed node URLs
    pub urls: Vec<String>,
    /// Basic auth user name
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    /// Headers added to every request unless the request sets them
    pub headers: HashMap<String, String>,
    /// PEM bundle added to the TLS root store
    pub ca_cert_path: Option<String>,
    /// Response codes that trigger a retry
    pub retry_on_status: Vec<u16>,
    pub disable_retry: bool,
    pub enable_retry_on_timeout: bool,
    /// Retries after the first attempt: `0` = 6, negative = none
    pub max_retries: i32,
    pub compress_request_body: bool,
    /// Seconds between discovery runs, `0` disables the timer
    pub discover_nodes_interval_secs: u64,
    /// Run one discovery right after the client is built
    pub discover_nodes_on_start: bool,
    pub include_dedicated_cluster_managers: bool,
    /// Probe retries per node during discovery
    pub discovery_health_check_retries: u32,
    /// `0` = 5000, negative = unbounded
    pub health_check_timeout_ms: i64,
    /// `0` = 6, negative = none
    pub health_check_max_retries: i32,
    /// `0.0` = 0.1, negative = none
    pub health_check_jitter: f64,
    pub resurrect_timeout_initial_secs: u64,
    pub resurrect_timeout_factor_cutoff: u32,
    pub enable_metrics: bool,
    /// Log request and response bodies with every round-trip
    pub enable_debug_logger: bool,
    pub selector: SelectorKind,
    pub router: RouterKind,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            username: None,
            password: None,
            headers: HashMap::new(),
            ca_cert_path: None,
            retry_on_status: DEFAULT_RETRY_ON_STATUS.to_vec(),
            disable_retry: false,
            enable_retry_on_timeout: false,
            max_retries: 0,
            compress_request_body: false,
            discover_nodes_interval_secs: 0,
            discover_nodes_on_start: false,
            include_dedicated_cluster_managers: false,
            discovery_health_check_retries: DEFAULT_DISCOVERY_HEALTH_CHECK_RETRIES,
            health_check_timeout_ms: 0,
            health_check_max_retries: 0,
            health_check_jitter: 0.0,
            resurrect_timeout_initial_secs: DEFAULT_RESURRECT_TIMEOUT_INITIAL_SECS,
            resurrect_timeout_factor_cutoff: DEFAULT_RESURRECT_TIMEOUT_FACTOR_CUTOFF,
            enable_metrics: false,
            enable_debug_logger: false,
            selector: SelectorKind::default(),
            router: RouterKind::default(),
        }
    }
}

/// Resolved settings: sentinels replaced, URLs and headers parsed.
#[derive(Clone)]
pub struct Settings {
    pub urls: Vec<Url>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub headers: HeaderMap,
    pub ca_cert: Option<Vec<u8>>,
    pub retry_on_status: Vec<u16>,
    pub disable_retry: bool,
    pub enable_retry_on_timeout: bool,
    pub max_retries: u32,
    pub compress_request_body: bool,
    pub discover_nodes_interval: Option<Duration>,
    pub discover_nodes_on_start: bool,
    pub include_dedicated_cluster_managers: bool,
    pub discovery_health_check_retries: u32,
    /// `None` means unbounded
    pub health_check_timeout: Option<Duration>,
    pub health_check_max_retries: u32,
    pub health_check_jitter: f64,
    pub resurrect_timeout_initial: Duration,
    pub resurrect_timeout_factor_cutoff: u32,
    pub enable_metrics: bool,
    pub enable_debug_logger: bool,
    pub selector: SelectorKind,
    pub router: RouterKind,
}

impl Settings {
    /// Retries are on unless disabled or resolved to zero.
    pub fn retries_enabled(&self) -> bool {
        !self.disable_retry && self.max_retries > 0
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let urls: Vec<&str> = self.urls.iter().map(Url::as_str).collect();
        f.debug_struct("Settings")
            .field("urls", &urls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("headers", &self.headers.len())
            .field("ca_cert", &self.ca_cert.is_some())
            .field("retry_on_status", &self.retry_on_status)
            .field("disable_retry", &self.disable_retry)
            .field("enable_retry_on_timeout", &self.enable_retry_on_timeout)
            .field("max_retries", &self.max_retries)
            .field("compress_request_body", &self.compress_request_body)
            .field("discover_nodes_interval", &self.discover_nodes_interval)
            .field("discover_nodes_on_start", &self.discover_nodes_on_start)
            .field(
                "include_dedicated_cluster_managers",
                &self.include_dedicated_cluster_managers,
            )
            .field(
                "discovery_health_check_retries",
                &self.discovery_health_check_retries,
            )
            .field("health_check_timeout", &self.health_check_timeout)
            .field("health_check_max_retries", &self.health_check_max_retries)
            .field("health_check_jitter", &self.health_check_jitter)
            .field("resurrect_timeout_initial", &self.resurrect_timeout_initial)
            .field(
                "resurrect_timeout_factor_cutoff",
                &self.resurrect_timeout_factor_cutoff,
            )
            .field("enable_metrics", &self.enable_metrics)
            .field("enable_debug_logger", &self.enable_debug_logger)
            .field("selector", &self.selector)
            .field("router", &self.router)
            .finish()
    }
}
