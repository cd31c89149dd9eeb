use crate::ports::{RoundTripLogger, RoundTripRecord};

/// Round-trip logger writing one `tracing` event per attempt.
///
/// Successful round-trips are logged at `debug`, failed ones at `warn`.
/// With bodies enabled, request and response payloads are attached as
/// lossy UTF-8.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger {
    bodies: bool,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include request and response bodies.
    pub fn with_bodies(bodies: bool) -> Self {
        Self { bodies }
    }
}

impl RoundTripLogger for TracingLogger {
    fn log_round_trip(&self, record: &RoundTripRecord<'_>) {
        let duration_ms = record.duration.as_millis() as u64;
        let request_body = record
            .request_body
            .map(|b| String::from_utf8_lossy(b).into_owned());
        let response_body = record
            .response_body
            .map(|b| String::from_utf8_lossy(b).into_owned());

        match (record.status, record.error) {
            (Some(status), _) => tracing::debug!(
                http.method = %record.method,
                url = record.url,
                http.status_code = status.as_u16(),
                duration_ms,
                request.body = request_body,
                response.body = response_body,
                "{} {} -> {}",
                record.method,
                record.url,
                status
            ),
            (None, Some(error)) => tracing::warn!(
                http.method = %record.method,
                url = record.url,
                duration_ms,
                request.body = request_body,
                "{} {} failed: {}",
                record.method,
                record.url,
                error
            ),
            (None, None) => tracing::debug!(
                http.method = %record.method,
                url = record.url,
                duration_ms,
                "{} {} finished without response",
                record.method,
                record.url
            ),
        }
    }

    fn request_body_enabled(&self) -> bool {
        self.bodies
    }

    fn response_body_enabled(&self) -> bool {
        self.bodies
    }
}
