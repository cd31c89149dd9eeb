//! Node health probes.
//!
//! [`DefaultHealthCheck`] sends `GET /` to a node and expects a cluster
//! greeting; [`HealthCheckRetry`] wraps any probe in jittered exponential
//! backoff.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::body::Body;
use http::StatusCode;
use http_body_util::BodyExt;
use rand::Rng;
use serde::Deserialize;
use url::Url;

use crate::{
    config::DEFAULT_HEALTH_CHECK_TIMEOUT,
    core::request::RequestDecorator,
    ports::{HealthCheck, HealthCheckError, Response, RoundTripper, TransportError},
};

/// Attempt exponents beyond this are clamped.
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Deserialize)]
struct Greeting {
    #[serde(default)]
    name: String,
    #[serde(default)]
    cluster_name: String,
    #[serde(default)]
    version: GreetingVersion,
}

#[derive(Debug, Default, Deserialize)]
struct GreetingVersion {
    #[serde(default)]
    number: String,
}

impl Greeting {
    fn validate(&self) -> Result<(), HealthCheckError> {
        let missing = [
            ("name", &self.name),
            ("cluster_name", &self.cluster_name),
            ("version.number", &self.version.number),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty());

        match missing {
            Some((field, _)) => Err(HealthCheckError::InvalidResponse(format!(
                "missing field {field}"
            ))),
            None => Ok(()),
        }
    }
}

/// Probe that asks the node for its greeting document.
pub struct DefaultHealthCheck {
    transport: Arc<dyn RoundTripper>,
    decorator: RequestDecorator,
    timeout: Option<Duration>,
}

impl DefaultHealthCheck {
    /// `timeout` of `None` means unbounded.
    pub fn new(
        transport: Arc<dyn RoundTripper>,
        decorator: RequestDecorator,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            decorator,
            timeout,
        }
    }

    async fn probe(&self, url: &Url) -> Result<Option<Response>, HealthCheckError> {
        let (mut parts, body) = http::Request::get("/")
            .body(Body::empty())
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?
            .into_parts();

        self.decorator
            .prepare(&mut parts, url)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        self.decorator
            .sign(&mut parts, &[])
            .await
            .map_err(|e| TransportError::InvalidRequest(format!("signing failed: {e}")))?;

        let response = self
            .transport
            .round_trip(http::Request::from_parts(parts, body))
            .await?;

        if response.status() != StatusCode::OK {
            return Err(HealthCheckError::UnexpectedStatus(response.status().as_u16()));
        }

        let (parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| HealthCheckError::InvalidResponse(e.to_string()))?
            .to_bytes();

        let greeting: Greeting = serde_json::from_slice(&bytes)
            .map_err(|e| HealthCheckError::InvalidResponse(e.to_string()))?;
        greeting.validate()?;

        tracing::debug!(
            "Node {} is healthy ({} / {} v{})",
            url,
            greeting.cluster_name,
            greeting.name,
            greeting.version.number
        );
        Ok(Some(Response::from_parts(parts, Body::from(bytes))))
    }
}

#[async_trait]
impl HealthCheck for DefaultHealthCheck {
    async fn check(&self, url: &Url) -> Result<Option<Response>, HealthCheckError> {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.probe(url))
                .await
                .map_err(|_| HealthCheckError::Timeout)?,
            None => self.probe(url).await,
        }
    }
}

/// `base * 2^attempt`, shifted by `jitter * delay * sample` with `sample`
/// in `[-1, 1]`.
pub fn backoff_delay(base: Duration, attempt: u32, jitter: f64, sample: f64) -> Duration {
    let delay = base.as_secs_f64() * f64::from(1u32 << attempt.min(MAX_BACKOFF_EXPONENT));
    let jittered = delay + jitter * delay * sample.clamp(-1.0, 1.0);
    Duration::from_secs_f64(jittered.max(0.0))
}

/// Retries a probe with jittered exponential backoff.
pub struct HealthCheckRetry {
    inner: Arc<dyn HealthCheck>,
    max_retries: u32,
    base_delay: Duration,
    jitter: f64,
}

impl HealthCheckRetry {
    /// The base delay is half the probe timeout (half the default when
    /// unbounded).
    pub fn new(
        inner: Arc<dyn HealthCheck>,
        max_retries: u32,
        timeout: Option<Duration>,
        jitter: f64,
    ) -> Self {
        let base_delay = timeout.unwrap_or(DEFAULT_HEALTH_CHECK_TIMEOUT) / 2;
        Self {
            inner,
            max_retries,
            base_delay,
            jitter,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let sample = if self.jitter > 0.0 {
            rand::rng().random_range(-1.0..=1.0)
        } else {
            0.0
        };
        backoff_delay(self.base_delay, attempt, self.jitter, sample)
    }
}

#[async_trait]
impl HealthCheck for HealthCheckRetry {
    async fn check(&self, url: &Url) -> Result<Option<Response>, HealthCheckError> {
        let mut attempt = 0;
        loop {
            match self.inner.check(url).await {
                Ok(response) => return Ok(response),
                Err(err) if attempt >= self.max_retries => {
                    tracing::debug!(
                        "Health check of {} failed after {} attempts: {}",
                        url,
                        attempt + 1,
                        err
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay(attempt);
                    tracing::debug!(
                        "Health check of {} failed ({}), retrying in {:?}",
                        url,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::HeaderMap;
    use parking_lot::Mutex;

    use super::*;
    use crate::ports::TransportResult;

    struct StaticTransport {
        status: StatusCode,
        body: &'static str,
        seen: Mutex<Vec<http::Request<()>>>,
    }

    impl StaticTransport {
        fn new(status: StatusCode, body: &'static str) -> Self {
            Self {
                status,
                body,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RoundTripper for StaticTransport {
        async fn round_trip(&self, req: crate::ports::Request) -> TransportResult<Response> {
            let (parts, _) = req.into_parts();
            self.seen.lock().push(http::Request::from_parts(parts, ()));
            Ok(http::Response::builder()
                .status(self.status)
                .body(Body::from(self.body))
                .unwrap())
        }
    }

    struct FlakyCheck {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HealthCheck for FlakyCheck {
        async fn check(&self, _url: &Url) -> Result<Option<Response>, HealthCheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(HealthCheckError::UnexpectedStatus(503));
            }
            Ok(None)
        }
    }

    fn decorator() -> RequestDecorator {
        RequestDecorator::new(HeaderMap::new(), Some("admin"), Some("admin"), None)
    }

    const GREETING: &str =
        r#"{"name":"node-1","cluster_name":"search","version":{"number":"2.11.0"}}"#;

    #[tokio::test]
    async fn test_default_health_check_accepts_greeting() {
        let transport = Arc::new(StaticTransport::new(StatusCode::OK, GREETING));
        let check = DefaultHealthCheck::new(transport.clone(), decorator(), None);
        let url = Url::parse("http://node:9200").unwrap();

        let response = check.check(&url).await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = transport.seen.lock();
        assert_eq!(seen[0].uri().to_string(), "http://node:9200/");
        assert!(seen[0].headers().contains_key(http::header::AUTHORIZATION));
        assert!(seen[0].headers().contains_key(http::header::USER_AGENT));
    }

    #[tokio::test]
    async fn test_default_health_check_rejects_bad_responses() {
        let url = Url::parse("http://node:9200").unwrap();

        let transport = Arc::new(StaticTransport::new(StatusCode::SERVICE_UNAVAILABLE, GREETING));
        let check = DefaultHealthCheck::new(transport, decorator(), None);
        assert!(matches!(
            check.check(&url).await,
            Err(HealthCheckError::UnexpectedStatus(503))
        ));

        let transport = Arc::new(StaticTransport::new(
            StatusCode::OK,
            r#"{"name":"node-1","cluster_name":"search","version":{}}"#,
        ));
        let check = DefaultHealthCheck::new(transport, decorator(), None);
        assert!(matches!(
            check.check(&url).await,
            Err(HealthCheckError::InvalidResponse(_))
        ));

        let transport = Arc::new(StaticTransport::new(StatusCode::OK, "not json"));
        let check = DefaultHealthCheck::new(transport, decorator(), None);
        assert!(check.check(&url).await.is_err());
    }

    #[test]
    fn test_backoff_delay_schedule() {
        let base = Duration::from_millis(2500);
        assert_eq!(backoff_delay(base, 0, 0.1, 0.0), Duration::from_millis(2500));
        assert_eq!(backoff_delay(base, 2, 0.0, 1.0), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, 1, 0.1, 1.0), Duration::from_millis(5500));
        assert_eq!(backoff_delay(base, 1, 0.1, -1.0), Duration::from_millis(4500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let flaky = Arc::new(FlakyCheck {
            failures_left: AtomicUsize::new(2),
            calls: AtomicUsize::new(0),
        });
        let retry = HealthCheckRetry::new(flaky.clone(), 3, Some(Duration::from_secs(1)), 0.0);

        let result = retry.check(&Url::parse("http://node").unwrap()).await;
        assert!(result.is_ok());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let flaky = Arc::new(FlakyCheck {
            failures_left: AtomicUsize::new(10),
            calls: AtomicUsize::new(0),
        });
        let retry = HealthCheckRetry::new(flaky.clone(), 2, None, 0.1);

        let result = retry.check(&Url::parse("http://node").unwrap()).await;
        assert!(matches!(result, Err(HealthCheckError::UnexpectedStatus(503))));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }
}
