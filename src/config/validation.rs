use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::config::models::{
    DEFAULT_HEALTH_CHECK_JITTER, DEFAULT_HEALTH_CHECK_MAX_RETRIES, DEFAULT_HEALTH_CHECK_TIMEOUT,
    DEFAULT_MAX_RETRIES, DEFAULT_URL, Settings, TransportConfig,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid CA certificate: {message}")]
    InvalidCaCert { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Checks a [`TransportConfig`] and resolves it into [`Settings`]
pub struct TransportConfigValidator;

impl TransportConfigValidator {
    /// Validate the whole configuration, collecting every problem.
    pub fn validate(config: &TransportConfig) -> ValidationResult<Settings> {
        let mut errors = Vec::new();

        let urls = match Self::resolve_urls(&config.urls) {
            Ok(urls) => urls,
            Err(mut url_errors) => {
                errors.append(&mut url_errors);
                Vec::new()
            }
        };

        let headers = match Self::resolve_headers(config) {
            Ok(headers) => headers,
            Err(mut header_errors) => {
                errors.append(&mut header_errors);
                HeaderMap::new()
            }
        };

        if config.password.is_some() && config.username.is_none() {
            errors.push(ValidationError::InvalidField {
                field: "password".to_string(),
                message: "a password requires a username".to_string(),
            });
        }

        for status in &config.retry_on_status {
            if !(100..=599).contains(status) {
                errors.push(ValidationError::InvalidField {
                    field: "retry_on_status".to_string(),
                    message: format!("{status} is not an HTTP status code"),
                });
            }
        }

        if !config.health_check_jitter.is_finite() || config.health_check_jitter > 1.0 {
            errors.push(ValidationError::InvalidField {
                field: "health_check_jitter".to_string(),
                message: "must be a finite value no greater than 1.0".to_string(),
            });
        }

        if config.resurrect_timeout_initial_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "resurrect_timeout_initial_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let ca_cert = match &config.ca_cert_path {
            Some(path) => match Self::read_ca_cert(path) {
                Ok(pem) => Some(pem),
                Err(e) => {
                    errors.push(e);
                    None
                }
            },
            None => None,
        };

        if !errors.is_empty() {
            return Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            });
        }

        Ok(Settings {
            urls,
            username: config.username.clone(),
            password: config.password.clone(),
            headers,
            ca_cert,
            retry_on_status: config.retry_on_status.clone(),
            disable_retry: config.disable_retry,
            enable_retry_on_timeout: config.enable_retry_on_timeout,
            max_retries: resolve_count(config.max_retries, DEFAULT_MAX_RETRIES),
            compress_request_body: config.compress_request_body,
            discover_nodes_interval: (config.discover_nodes_interval_secs > 0)
                .then(|| Duration::from_secs(config.discover_nodes_interval_secs)),
            discover_nodes_on_start: config.discover_nodes_on_start,
            include_dedicated_cluster_managers: config.include_dedicated_cluster_managers,
            discovery_health_check_retries: config.discovery_health_check_retries,
            health_check_timeout: resolve_timeout(config.health_check_timeout_ms),
            health_check_max_retries: resolve_count(
                config.health_check_max_retries,
                DEFAULT_HEALTH_CHECK_MAX_RETRIES,
            ),
            health_check_jitter: resolve_jitter(config.health_check_jitter),
            resurrect_timeout_initial: Duration::from_secs(config.resurrect_timeout_initial_secs),
            resurrect_timeout_factor_cutoff: config.resurrect_timeout_factor_cutoff,
            enable_metrics: config.enable_metrics,
            enable_debug_logger: config.enable_debug_logger,
            selector: config.selector,
            router: config.router,
        })
    }

    /// Parse seed URLs; an empty list means the local default node.
    fn resolve_urls(urls: &[String]) -> Result<Vec<Url>, Vec<ValidationError>> {
        if urls.is_empty() {
            return Self::parse_url(DEFAULT_URL)
                .map(|url| vec![url])
                .map_err(|e| vec![e]);
        }

        let mut parsed = Vec::with_capacity(urls.len());
        let mut errors = Vec::new();
        for url in urls {
            match Self::parse_url(url.trim()) {
                Ok(url) => parsed.push(url),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(parsed)
        } else {
            Err(errors)
        }
    }

    fn parse_url(url_str: &str) -> ValidationResult<Url> {
        let url = Url::parse(url_str).map_err(|e| ValidationError::InvalidUrl {
            url: url_str.to_string(),
            reason: format!("Invalid URL format: {e}"),
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ValidationError::InvalidUrl {
                url: url_str.to_string(),
                reason: format!("URL scheme must be 'http' or 'https', got '{}'", url.scheme()),
            });
        }

        if url.host().is_none() {
            return Err(ValidationError::InvalidUrl {
                url: url_str.to_string(),
                reason: "URL must have a valid host".to_string(),
            });
        }

        Ok(url)
    }

    fn resolve_headers(config: &TransportConfig) -> Result<HeaderMap, Vec<ValidationError>> {
        let mut headers = HeaderMap::new();
        let mut errors = Vec::new();

        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes());
            let header_value = HeaderValue::from_str(value);
            match (header_name, header_value) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                (Err(e), _) => errors.push(ValidationError::InvalidField {
                    field: format!("headers.{name}"),
                    message: format!("invalid header name: {e}"),
                }),
                (_, Err(e)) => errors.push(ValidationError::InvalidField {
                    field: format!("headers.{name}"),
                    message: format!("invalid header value: {e}"),
                }),
            }
        }

        if errors.is_empty() {
            Ok(headers)
        } else {
            Err(errors)
        }
    }

    fn read_ca_cert(path: &str) -> ValidationResult<Vec<u8>> {
        std::fs::read(path).map_err(|e| ValidationError::InvalidCaCert {
            message: format!("cannot read {path}: {e}"),
        })
    }

    /// Format multiple validation errors into a readable message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

/// `0` = default, negative = zero.
fn resolve_count(value: i32, default: u32) -> u32 {
    match value {
        0 => default,
        v if v < 0 => 0,
        v => v.unsigned_abs(),
    }
}

/// `0` = default, negative = unbounded.
fn resolve_timeout(ms: i64) -> Option<Duration> {
    match ms {
        0 => Some(DEFAULT_HEALTH_CHECK_TIMEOUT),
        ms if ms < 0 => None,
        ms => Some(Duration::from_millis(ms.unsigned_abs())),
    }
}

/// `0.0` = default, negative = none.
fn resolve_jitter(jitter: f64) -> f64 {
    if jitter == 0.0 {
        DEFAULT_HEALTH_CHECK_JITTER
    } else if jitter < 0.0 {
        0.0
    } else {
        jitter
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::models::RouterKind;

    #[test]
    fn validate_defaults() {
        let settings = TransportConfigValidator::validate(&TransportConfig::default()).unwrap();

        assert_eq!(settings.urls.len(), 1);
        assert_eq!(settings.urls[0].as_str(), "http://localhost:9200/");
        assert_eq!(settings.max_retries, 6);
        assert_eq!(settings.retry_on_status, vec![502, 503, 504]);
        assert_eq!(settings.health_check_timeout, Some(Duration::from_secs(5)));
        assert_eq!(settings.health_check_max_retries, 6);
        assert_eq!(settings.health_check_jitter, 0.1);
        assert_eq!(settings.discovery_health_check_retries, 3);
        assert_eq!(settings.resurrect_timeout_initial, Duration::from_secs(60));
        assert_eq!(settings.resurrect_timeout_factor_cutoff, 5);
        assert!(settings.discover_nodes_interval.is_none());
        assert_eq!(settings.router, RouterKind::None);
        assert!(settings.retries_enabled());
    }

    #[test]
    fn validate_resolves_sentinels() {
        let config = TransportConfig {
            max_retries: -1,
            health_check_timeout_ms: -1,
            health_check_max_retries: -3,
            health_check_jitter: -0.5,
            discover_nodes_interval_secs: 30,
            ..TransportConfig::default()
        };
        let settings = TransportConfigValidator::validate(&config).unwrap();

        assert_eq!(settings.max_retries, 0);
        assert!(!settings.retries_enabled());
        assert!(settings.health_check_timeout.is_none());
        assert_eq!(settings.health_check_max_retries, 0);
        assert_eq!(settings.health_check_jitter, 0.0);
        assert_eq!(settings.discover_nodes_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn validate_rejects_bad_urls_and_headers() {
        let mut config = TransportConfig {
            urls: vec!["ftp://node".to_string(), "not a url".to_string()],
            ..TransportConfig::default()
        };
        config
            .headers
            .insert("bad header".to_string(), "value".to_string());

        let err = TransportConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Found 3 validation errors"), "{message}");
    }

    #[test]
    fn validate_rejects_password_without_username() {
        let config = TransportConfig {
            password: Some("secret".to_string()),
            ..TransportConfig::default()
        };
        assert!(TransportConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_bad_status_and_jitter() {
        let config = TransportConfig {
            retry_on_status: vec![42],
            health_check_jitter: f64::NAN,
            ..TransportConfig::default()
        };
        let err = TransportConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("2 validation errors"));
    }

    #[test]
    fn validate_reads_ca_cert() {
        let mut pem = NamedTempFile::new().unwrap();
        write!(pem, "-----BEGIN CERTIFICATE-----\n").unwrap();

        let config = TransportConfig {
            ca_cert_path: Some(pem.path().to_str().unwrap().to_string()),
            ..TransportConfig::default()
        };
        let settings = TransportConfigValidator::validate(&config).unwrap();
        assert!(settings.ca_cert.is_some());

        let missing = TransportConfig {
            ca_cert_path: Some("/nonexistent/ca.pem".to_string()),
            ..TransportConfig::default()
        };
        let err = TransportConfigValidator::validate(&missing).unwrap_err();
        assert!(err.to_string().contains("CA certificate"));
    }
}
