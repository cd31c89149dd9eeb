//! The client: owns the active pool, the optional router and every injected
//! collaborator, and runs requests through the perform loop.
use std::{
    fmt,
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use arc_swap::ArcSwapOption;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::{
    adapters::{HyperTransport, TracingLogger},
    config::{RouterKind, Settings, TransportConfig, TransportConfigValidator},
    core::{
        connection::Connection,
        discovery,
        health::{DefaultHealthCheck, HealthCheckRetry},
        metrics::{Metrics, MetricsSnapshot},
        perform,
        pool::{ClientPool, ConnectionPool, PoolFactory, PoolSettings, SinglePool, pool_factory},
        request::RequestDecorator,
        router::Router,
        selector::{Selector, SelectorFactory},
    },
    error::{Error, Result},
    ports::{HealthCheck, Request, Response, RoundTripLogger, RoundTripper, Signer},
    tracing_setup::create_perform_span,
};

/// Delay before retry number `attempt` (starting at 1).
pub type RetryBackoff = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// State shared by every handle of a [`Client`] and its background tasks.
pub(crate) struct ClientInner {
    pub(crate) settings: Settings,
    pub(crate) transport: Arc<dyn RoundTripper>,
    pub(crate) logger: Option<Arc<dyn RoundTripLogger>>,
    pub(crate) decorator: RequestDecorator,
    pub(crate) selector: Arc<dyn Selector>,
    pub(crate) router: Option<Router>,
    pub(crate) pool_factory: PoolFactory,
    pub(crate) pool_settings: PoolSettings,
    /// Single probe, no retries.
    pub(crate) health_check: Arc<dyn HealthCheck>,
    /// Probe with the configured health-check retries.
    pub(crate) probe: Arc<dyn HealthCheck>,
    /// Probe with the discovery retries.
    pub(crate) discovery_probe: Arc<dyn HealthCheck>,
    pub(crate) retry_backoff: Option<RetryBackoff>,
    /// Seed connections, routable until the first discovery when a router
    /// is configured.
    pub(crate) seeds: Vec<Arc<Connection>>,
    pub(crate) pool: ArcSwapOption<ClientPool>,
    pub(crate) metrics: Option<Arc<Metrics>>,
    pub(crate) discovery_in_progress: AtomicBool,
    pub(crate) cancel: CancellationToken,
}

impl ClientInner {
    /// Every known connection, live and dead.
    pub(crate) fn connections(&self) -> Vec<Arc<Connection>> {
        match self.pool.load_full() {
            Some(pool) => pool.connections(),
            None => self.seeds.clone(),
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Client-side transport for a search cluster.
///
/// Cloning is cheap; every clone shares the same pool, router and
/// background tasks.
///
/// ```no_run
/// use axum::body::Body;
/// use cluster_transport::Client;
///
/// # async fn run() -> cluster_transport::Result<()> {
/// let client = Client::builder()
///     .urls(["http://node-1:9200", "http://node-2:9200"])
///     .max_retries(3)
///     .build()?;
///
/// let request = http::Request::get("/_cluster/health").body(Body::empty()).unwrap();
/// let response = client.perform(request).await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a new client builder
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Build a client from a loaded configuration
    pub fn from_config(config: TransportConfig) -> Result<Self> {
        ClientBuilder::from_config(config).build()
    }

    /// Send a request to the cluster, retrying according to the settings.
    ///
    /// Place a [`CancellationToken`] in the request extensions to abort
    /// during retry backoff.
    pub async fn perform(&self, req: Request) -> Result<Response> {
        let request_id = Uuid::new_v4().to_string();
        let span = create_perform_span(req.method().as_str(), req.uri().path(), &request_id);
        perform::perform(&self.inner, req).instrument(span).await
    }

    /// Refresh the node list from the cluster now.
    ///
    /// Returns immediately when another discovery is running.
    pub async fn discover_nodes(&self) -> Result<()> {
        discovery::discover_nodes(&self.inner).await
    }

    /// Request counters and per-connection state.
    pub fn metrics(&self) -> Result<MetricsSnapshot> {
        let metrics = self.inner.metrics.as_ref().ok_or(Error::MetricsDisabled)?;
        Ok(metrics.snapshot(&self.inner.connections()))
    }

    /// URLs of routable connections.
    pub fn urls(&self) -> Vec<Url> {
        match self.inner.pool.load_full() {
            Some(pool) => pool.urls(),
            None => self.inner.seeds.iter().map(|c| c.url().clone()).collect(),
        }
    }

    /// Every known connection, live and dead.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner.connections()
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn router(&self) -> Option<&Router> {
        self.inner.router.as_ref()
    }

    /// Stop background discovery. In-flight requests are not affected.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("urls", &self.urls())
            .field("router", &self.inner.router.is_some())
            .field("metrics", &self.inner.metrics.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`]
///
/// Plain options go through [`TransportConfig`] and are validated in
/// [`ClientBuilder::build`]; collaborators are injected directly.
#[derive(Default)]
pub struct ClientBuilder {
    config: TransportConfig,
    max_retries: Option<u32>,
    ca_cert: Option<Vec<u8>>,
    transport: Option<Arc<dyn RoundTripper>>,
    logger: Option<Arc<dyn RoundTripLogger>>,
    signer: Option<Arc<dyn Signer>>,
    selector: Option<Arc<dyn Selector>>,
    router: Option<Router>,
    pool_factory: Option<PoolFactory>,
    health_check: Option<Arc<dyn HealthCheck>>,
    retry_backoff: Option<RetryBackoff>,
}

impl ClientBuilder {
    /// Start from a loaded configuration
    pub fn from_config(config: TransportConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Replace the seed URLs
    pub fn urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Basic auth credentials used when a node URL carries none
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Add a global header; request headers with the same name win
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(name.into(), value.into());
        self
    }

    /// PEM encoded CA certificates for the default transport
    pub fn ca_cert(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_cert = Some(pem.into());
        self
    }

    /// Status codes that trigger a retry
    pub fn retry_on_status(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.config.retry_on_status = statuses.into();
        self
    }

    pub fn disable_retry(mut self, disable: bool) -> Self {
        self.config.disable_retry = disable;
        self
    }

    pub fn enable_retry_on_timeout(mut self, enable: bool) -> Self {
        self.config.enable_retry_on_timeout = enable;
        self
    }

    /// Attempts beyond the first. Zero means a single attempt.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn compress_request_body(mut self, compress: bool) -> Self {
        self.config.compress_request_body = compress;
        self
    }

    /// Period of background discovery; zero disables it
    pub fn discover_nodes_interval(mut self, interval: Duration) -> Self {
        self.config.discover_nodes_interval_secs = interval.as_secs();
        self
    }

    pub fn discover_nodes_on_start(mut self, enable: bool) -> Self {
        self.config.discover_nodes_on_start = enable;
        self
    }

    pub fn include_dedicated_cluster_managers(mut self, include: bool) -> Self {
        self.config.include_dedicated_cluster_managers = include;
        self
    }

    pub fn discovery_health_check_retries(mut self, retries: u32) -> Self {
        self.config.discovery_health_check_retries = retries;
        self
    }

    pub fn resurrect_timeout_initial(mut self, timeout: Duration) -> Self {
        self.config.resurrect_timeout_initial_secs = timeout.as_secs();
        self
    }

    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.config.enable_metrics = enable;
        self
    }

    /// Log every round-trip, bodies included, through `tracing`
    pub fn enable_debug_logger(mut self, enable: bool) -> Self {
        self.config.enable_debug_logger = enable;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn RoundTripper>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn RoundTripLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn selector(mut self, selector: Arc<dyn Selector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Route requests through `router` instead of the client pool
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn pool_factory(mut self, factory: PoolFactory) -> Self {
        self.pool_factory = Some(factory);
        self
    }

    pub fn health_check(mut self, health_check: Arc<dyn HealthCheck>) -> Self {
        self.health_check = Some(health_check);
        self
    }

    pub fn retry_backoff<F>(mut self, backoff: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.retry_backoff = Some(Arc::new(backoff));
        self
    }

    /// Validate the options and start the client.
    ///
    /// Background discovery is spawned on the current tokio runtime.
    pub fn build(self) -> Result<Client> {
        let mut settings = TransportConfigValidator::validate(&self.config)?;
        if let Some(retries) = self.max_retries {
            settings.max_retries = retries;
        }
        if let Some(pem) = self.ca_cert {
            settings.ca_cert = Some(pem);
        }

        let transport: Arc<dyn RoundTripper> = match self.transport {
            Some(_) if settings.ca_cert.is_some() => {
                return Err(Error::Configuration(
                    "a CA certificate cannot be combined with a custom transport".to_string(),
                ));
            }
            Some(transport) => transport,
            None => Arc::new(HyperTransport::with_ca_cert(settings.ca_cert.as_deref())?),
        };

        let logger = self.logger.or_else(|| {
            settings
                .enable_debug_logger
                .then(|| Arc::new(TracingLogger::with_bodies(true)) as Arc<dyn RoundTripLogger>)
        });

        let decorator = RequestDecorator::new(
            settings.headers.clone(),
            settings.username.as_deref(),
            settings.password.as_deref(),
            self.signer,
        );

        let metrics = settings.enable_metrics.then(|| Arc::new(Metrics::new()));
        let pool_settings = PoolSettings {
            resurrect_timeout_initial: settings.resurrect_timeout_initial,
            resurrect_timeout_factor_cutoff: settings.resurrect_timeout_factor_cutoff,
            metrics: metrics.clone(),
        };
        let factory = self
            .pool_factory
            .unwrap_or_else(|| pool_factory(pool_settings.clone()));
        let selector = self
            .selector
            .unwrap_or_else(|| SelectorFactory::create_selector(&settings.selector));

        let router = match self.router {
            Some(router) => Some(router),
            None => match settings.router {
                RouterKind::None => None,
                RouterKind::Default => Some(Router::default_router()?),
                RouterKind::Smart => Some(Router::smart()?),
            },
        };

        let health_check = self.health_check.unwrap_or_else(|| {
            Arc::new(DefaultHealthCheck::new(
                transport.clone(),
                decorator.clone(),
                settings.health_check_timeout,
            ))
        });
        let probe: Arc<dyn HealthCheck> = Arc::new(HealthCheckRetry::new(
            health_check.clone(),
            settings.health_check_max_retries,
            settings.health_check_timeout,
            settings.health_check_jitter,
        ));
        let discovery_probe: Arc<dyn HealthCheck> = Arc::new(HealthCheckRetry::new(
            health_check.clone(),
            settings.discovery_health_check_retries,
            settings.health_check_timeout,
            settings.health_check_jitter,
        ));

        let seeds: Vec<Arc<Connection>> = settings
            .urls
            .iter()
            .map(|url| Arc::new(Connection::new(url.clone())))
            .collect();

        let pool = match &router {
            Some(router) => {
                router.configure_pool_factory(&factory);
                router.discovery_update(&seeds, &[], &[]);
                None
            }
            None if seeds.len() == 1 => Some(Arc::new(ClientPool::Single(SinglePool::new(
                seeds[0].clone(),
                metrics.clone(),
            )))),
            None => Some(Arc::new(ClientPool::Status(factory(
                seeds.clone(),
                selector.clone(),
            )))),
        };

        if metrics.is_some() {
            crate::metrics::init_metrics();
        }

        tracing::debug!(
            "Transport client created for {} seed URL(s), router: {}",
            seeds.len(),
            router.is_some()
        );

        let inner = Arc::new(ClientInner {
            settings,
            transport,
            logger,
            decorator,
            selector,
            router,
            pool_factory: factory,
            pool_settings,
            health_check,
            probe,
            discovery_probe,
            retry_backoff: self.retry_backoff,
            seeds,
            pool: ArcSwapOption::new(pool),
            metrics,
            discovery_in_progress: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        if let Some(interval) = inner.settings.discover_nodes_interval {
            discovery::spawn_discovery_loop(Arc::downgrade(&inner), interval, inner.cancel.clone());
        }
        if inner.settings.discover_nodes_on_start {
            discovery::spawn_discovery(Arc::downgrade(&inner));
        }

        Ok(Client { inner })
    }
}
