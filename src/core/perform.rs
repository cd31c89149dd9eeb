//! The request execution loop.
//!
//! A request body is prepared once, before the first attempt, so that every
//! attempt replays the same bytes from the start. Each attempt then draws a
//! connection, decorates and signs the request, and feeds the outcome back to
//! the pool it came from.
use std::{
    sync::Arc,
    time::{Instant, SystemTime},
};

use axum::body::Body;
use bytes::Bytes;
use http::{
    HeaderMap, HeaderValue,
    header::{CONTENT_ENCODING, CONTENT_LENGTH},
    request::Parts,
};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    core::{
        client::ClientInner,
        connection::Connection,
        gzip,
        pool::{ConnectionPool, PoolError},
    },
    error::{Error, Result},
    ports::{
        GetBody, Request, Response, RoundTripLogger, RoundTripRecord, TransportError,
        transport::is_empty_body,
    },
    tracing_setup::create_attempt_span,
};

/// Where each attempt gets its body from.
enum BodySource {
    Empty,
    Replay(GetBody),
    /// Single-attempt requests stream the caller's body as is.
    Once(Option<Body>),
}

impl BodySource {
    fn next_body(&mut self) -> Body {
        match self {
            BodySource::Empty => Body::empty(),
            BodySource::Replay(get_body) => get_body.body(),
            BodySource::Once(body) => body.take().unwrap_or_else(Body::empty),
        }
    }

    fn get_body(&self) -> Option<&GetBody> {
        match self {
            BodySource::Replay(get_body) => Some(get_body),
            _ => None,
        }
    }
}

/// Request body after one-shot preparation.
///
/// Dropping it hands a pooled gzip buffer back to the compressor once every
/// other reference held here is gone.
struct PreparedBody {
    source: BodySource,
    /// Bytes shown to the signer and the logger.
    buffered: Option<Bytes>,
    compressed: Option<Bytes>,
}

impl PreparedBody {
    fn empty() -> Self {
        Self::from_source(BodySource::Empty, None)
    }

    fn from_source(source: BodySource, buffered: Option<Bytes>) -> Self {
        Self {
            source,
            buffered,
            compressed: None,
        }
    }

    fn buffered(bytes: Bytes) -> Self {
        Self::from_source(
            BodySource::Replay(GetBody::from_bytes(bytes.clone())),
            Some(bytes),
        )
    }
}

impl Drop for PreparedBody {
    fn drop(&mut self) {
        self.source = BodySource::Empty;
        self.buffered = None;
        if let Some(buffer) = self.compressed.take() {
            gzip::collect_buffer(buffer);
        }
    }
}

async fn collect_body(body: Body) -> Result<Bytes> {
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| Error::Body(e.to_string()))
}

async fn prepare_body(inner: &ClientInner, parts: &mut Parts, body: Body) -> Result<PreparedBody> {
    let caller_get_body = parts.extensions.remove::<GetBody>();
    let log_body = inner
        .logger
        .as_ref()
        .is_some_and(|logger| logger.request_body_enabled());
    let sign_body = inner.decorator.has_signer();

    if caller_get_body.is_none() && is_empty_body(&body) {
        return Ok(PreparedBody::empty());
    }

    if inner.settings.compress_request_body {
        let raw = match &caller_get_body {
            Some(get_body) => collect_body(get_body.body()).await?,
            None => collect_body(body).await?,
        };
        if raw.is_empty() {
            return Ok(PreparedBody::empty());
        }
        let compressed = gzip::compress(&raw)
            .map_err(|e| Error::Body(format!("failed to compress request body: {e}")))?;
        parts
            .headers
            .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        parts
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from(compressed.len()));

        let mut prepared = PreparedBody::buffered(compressed.clone());
        prepared.compressed = Some(compressed);
        return Ok(prepared);
    }

    if let Some(get_body) = caller_get_body {
        let buffered = if log_body || sign_body {
            Some(collect_body(get_body.body()).await?)
        } else {
            None
        };
        return Ok(PreparedBody::from_source(
            BodySource::Replay(get_body),
            buffered,
        ));
    }

    if inner.settings.retries_enabled() || log_body || sign_body {
        return Ok(PreparedBody::buffered(collect_body(body).await?));
    }

    Ok(PreparedBody::from_source(BodySource::Once(Some(body)), None))
}

fn clone_parts(parts: &Parts) -> Parts {
    let mut req = http::Request::new(());
    *req.method_mut() = parts.method.clone();
    *req.uri_mut() = parts.uri.clone();
    *req.version_mut() = parts.version;
    *req.headers_mut() = parts.headers.clone();
    *req.extensions_mut() = parts.extensions.clone();
    req.into_parts().0
}

/// Router first, then the client pool.
fn select_connection(
    inner: &ClientInner,
    parts: &Parts,
) -> Result<(Arc<dyn ConnectionPool>, Arc<Connection>)> {
    if let Some(router) = &inner.router {
        let probe = http::Request::from_parts(clone_parts(parts), Body::empty());
        let selection = router.route(&probe)?;
        let pool: Arc<dyn ConnectionPool> = selection.pool;
        return Ok((pool, selection.connection));
    }

    let pool = inner
        .pool
        .load_full()
        .ok_or_else(|| Error::NoConnection(PoolError::NoConnection.to_string()))?;
    let connection = pool.next()?;
    let pool: Arc<dyn ConnectionPool> = pool;
    Ok((pool, connection))
}

/// Request side of a logged round-trip.
struct LoggedRequest<'a> {
    method: &'a http::Method,
    url: String,
    headers: HeaderMap,
    body: Option<&'a Bytes>,
    start: SystemTime,
}

impl LoggedRequest<'_> {
    fn log_error(&self, logger: &dyn RoundTripLogger, error: &TransportError, started: Instant) {
        logger.log_round_trip(&RoundTripRecord {
            method: self.method,
            url: &self.url,
            request_headers: &self.headers,
            request_body: self.body,
            status: None,
            response_headers: None,
            response_body: None,
            error: Some(error),
            start: self.start,
            duration: started.elapsed(),
        });
    }

    /// Log a response, buffering its body first when the logger wants it.
    async fn log_response(
        &self,
        logger: &dyn RoundTripLogger,
        response: Response,
        started: Instant,
    ) -> Result<Response> {
        let duration = started.elapsed();
        let (parts, body) = response.into_parts();
        let (body, captured) = if logger.response_body_enabled() {
            let bytes = collect_body(body).await?;
            (Body::from(bytes.clone()), Some(bytes))
        } else {
            (body, None)
        };

        logger.log_round_trip(&RoundTripRecord {
            method: self.method,
            url: &self.url,
            request_headers: &self.headers,
            request_body: self.body,
            status: Some(parts.status),
            response_headers: Some(&parts.headers),
            response_body: captured.as_ref(),
            error: None,
            start: self.start,
            duration,
        });
        Ok(Response::from_parts(parts, body))
    }
}

async fn drain(response: Response) {
    if let Err(e) = response.into_body().collect().await {
        tracing::debug!("Failed to drain response body: {}", e);
    }
}

async fn backoff(
    inner: &ClientInner,
    attempt: u32,
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    let Some(retry_backoff) = &inner.retry_backoff else {
        return Ok(());
    };
    let delay = retry_backoff(attempt);
    tracing::debug!("Retrying in {:?} after attempt {}", delay, attempt);

    match cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        },
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

/// Run `req` against the cluster with retries.
///
/// The returned response always carries a fully buffered body.
pub(crate) async fn perform(inner: &ClientInner, req: Request) -> Result<Response> {
    let settings = &inner.settings;
    let (mut parts, body) = req.into_parts();
    let cancel = parts.extensions.get::<CancellationToken>().cloned();
    let mut body = prepare_body(inner, &mut parts, body).await?;

    let max_attempts = if settings.retries_enabled() {
        settings.max_retries.saturating_add(1)
    } else {
        1
    };

    if let Some(metrics) = &inner.metrics {
        metrics.increment_requests();
    }
    crate::metrics::increment_requests(parts.method.as_str());

    let mut response: Option<Response> = None;
    let mut error: Option<Error> = None;

    for attempt in 1..=max_attempts {
        tracing::Span::current().record("attempts", attempt);

        let (pool, connection) = match select_connection(inner, &parts) {
            Ok(selected) => selected,
            Err(err) => {
                tracing::error!("Cannot get connection: {}", err);
                return Err(err);
            }
        };

        let mut attempt_parts = clone_parts(&parts);
        if let Some(get_body) = body.source.get_body() {
            attempt_parts.extensions.insert(get_body.clone());
        }
        inner
            .decorator
            .prepare(&mut attempt_parts, connection.url())
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        inner
            .decorator
            .sign(&mut attempt_parts, body.buffered.as_deref().unwrap_or_default())
            .await
            .map_err(Error::Sign)?;

        let logged = inner.logger.as_ref().map(|_| LoggedRequest {
            method: &parts.method,
            url: attempt_parts.uri.to_string(),
            headers: attempt_parts.headers.clone(),
            body: body.buffered.as_ref(),
            start: SystemTime::now(),
        });

        let request = http::Request::from_parts(attempt_parts, body.source.next_body());
        let span = create_attempt_span(connection.url().as_str(), attempt);
        let mut timer = crate::metrics::RoundTripTimer::new(connection.url().as_str());
        let started = Instant::now();
        let result = inner
            .transport
            .round_trip(request)
            .instrument(span.clone())
            .await;
        span.record("duration_ms", started.elapsed().as_millis() as u64);

        let mut should_retry = false;
        let mut should_close_body = false;

        match result {
            Err(err) => {
                if let Some(metrics) = &inner.metrics {
                    metrics.increment_failures();
                }
                crate::metrics::increment_failures(connection.url().as_str());
                if let Err(pool_err) = pool.on_failure(&connection) {
                    tracing::warn!(
                        "Unable to mark connection {} as dead: {}",
                        connection.url(),
                        pool_err
                    );
                }
                if let (Some(logger), Some(logged)) = (&inner.logger, &logged) {
                    logged.log_error(logger.as_ref(), &err, started);
                }

                should_retry = if err.is_timeout() {
                    settings.enable_retry_on_timeout && !settings.disable_retry
                } else {
                    err.is_retriable_network_error()
                };
                tracing::debug!(
                    "Round-trip to {} failed (attempt {}/{}): {}",
                    connection.url(),
                    attempt,
                    max_attempts,
                    err
                );

                response = None;
                error = Some(Error::Transport(err));
            }
            Ok(res) => {
                pool.on_success(&connection);
                let status = res.status().as_u16();
                timer.status(status);
                span.record("http.status_code", status);
                tracing::Span::current().record("http.status_code", status);
                if let Some(metrics) = &inner.metrics {
                    metrics.increment_response(status);
                }

                let res = match (&inner.logger, &logged) {
                    (Some(logger), Some(logged)) => {
                        logged.log_response(logger.as_ref(), res, started).await?
                    }
                    _ => res,
                };

                if settings.retries_enabled() && settings.retry_on_status.contains(&status) {
                    tracing::debug!(
                        "Node {} answered {} (attempt {}/{})",
                        connection.url(),
                        status,
                        attempt,
                        max_attempts
                    );
                    should_retry = true;
                    should_close_body = true;
                }

                response = Some(res);
                error = None;
            }
        }
        drop(timer);

        if !should_retry || attempt == max_attempts {
            break;
        }

        if should_close_body {
            if let Some(res) = response.take() {
                drain(res).await;
            }
        }

        backoff(inner, attempt, cancel.as_ref()).await?;
    }

    match (response, error) {
        (Some(res), _) => {
            let (parts, res_body) = res.into_parts();
            let bytes = collect_body(res_body).await?;
            Ok(Response::from_parts(parts, Body::from(bytes)))
        }
        (None, Some(err)) => Err(err),
        (None, None) => Err(Error::NoConnection(PoolError::NoConnection.to_string())),
    }
}
