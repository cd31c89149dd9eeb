use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use crate::ports::transport::TransportError;

/// Everything known about one finished round-trip.
///
/// Bodies are only present when the logger asked for them via
/// [`RoundTripLogger::request_body_enabled`] / [`RoundTripLogger::response_body_enabled`].
#[derive(Debug)]
pub struct RoundTripRecord<'a> {
    pub method: &'a Method,
    pub url: &'a str,
    pub request_headers: &'a HeaderMap,
    pub request_body: Option<&'a Bytes>,
    pub status: Option<StatusCode>,
    pub response_headers: Option<&'a HeaderMap>,
    pub response_body: Option<&'a Bytes>,
    pub error: Option<&'a TransportError>,
    pub start: SystemTime,
    pub duration: Duration,
}

/// Port for observing round-trips.
pub trait RoundTripLogger: Send + Sync + 'static {
    /// Called once per attempt, successful or not.
    fn log_round_trip(&self, record: &RoundTripRecord<'_>);

    /// Whether the request body should be captured for logging.
    fn request_body_enabled(&self) -> bool {
        false
    }

    /// Whether the response body should be captured for logging.
    fn response_body_enabled(&self) -> bool {
        false
    }
}
