//! Subscriber setup for the binary and span helpers for the library.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the embedding application or to [`init_tracing_with_config`].
use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, multi-line events.
    Pretty,
    /// One JSON object per event, optionally with the span stack.
    Json { spans: bool },
}

impl LogFormat {
    pub fn from_flags(json: bool, spans: bool) -> Self {
        if json {
            LogFormat::Json { spans }
        } else {
            LogFormat::Pretty
        }
    }
}

/// Parse a filter directive; a bare level applies to every target.
pub fn build_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive).wrap_err_with(|| format!("Invalid log filter: {directive}"))
}

/// Install a global subscriber. Fails if one is already installed.
pub fn init_tracing_with_config(level: &str, json_format: bool, include_spans: bool) -> Result<()> {
    let filter = build_filter(level)?;
    let format = LogFormat::from_flags(json_format, include_spans);
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Json { spans } => Registry::default()
            .with(filter)
            .with(layer.json().with_current_span(spans).with_span_list(spans))
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(filter)
            .with(layer.pretty())
            .try_init(),
    }
    .wrap_err("Failed to install tracing subscriber")?;

    tracing::debug!(?format, filter = level, "Logging initialized");
    Ok(())
}

/// Span for background work of one component (discovery, probes).
pub fn configure_component_tracing(component: &str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

/// Span covering one `perform` call, across all of its attempts.
pub fn create_perform_span(method: &str, path: &str, request_id: &str) -> tracing::Span {
    tracing::debug_span!(
        "perform",
        http.method = method,
        http.path = path,
        request.id = request_id,
        attempts = tracing::field::Empty,
        http.status_code = tracing::field::Empty,
    )
}

/// Span covering a single round-trip to a node.
pub fn create_attempt_span(node_url: &str, attempt: u32) -> tracing::Span {
    tracing::debug_span!(
        "round_trip",
        node.url = node_url,
        attempt = attempt,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}
