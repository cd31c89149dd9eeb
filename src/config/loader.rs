use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::TransportConfig;

/// Prefix of environment overrides, e.g. `CLUSTER_TRANSPORT_MAX_RETRIES`.
pub const ENV_PREFIX: &str = "CLUSTER_TRANSPORT";

/// Comma-separated seed list consulted when no URLs are configured.
pub const URL_ENV_VAR: &str = "CLUSTER_TRANSPORT_URL";

/// Load configuration from an optional file plus environment overrides.
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: Option<&str>) -> Result<TransportConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: Option<&str>) -> Result<TransportConfig> {
    let mut builder = Config::builder();

    if let Some(config_path) = config_path {
        let path = Path::new(config_path);
        builder = builder.add_source(File::new(config_path, file_format(path)));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("urls")
            .with_list_parse_key("retry_on_status"),
    );

    let settings = builder
        .build()
        .with_context(|| match config_path {
            Some(path) => format!("Failed to build config from {path}"),
            None => "Failed to build config from environment".to_string(),
        })?;

    let mut transport_config: TransportConfig = settings
        .try_deserialize()
        .context("Failed to deserialize transport config")?;

    if transport_config.urls.is_empty() {
        transport_config.urls = urls_from_env();
    }

    Ok(transport_config)
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml,
    }
}

fn urls_from_env() -> Vec<String> {
    std::env::var(URL_ENV_VAR)
        .map(|value| parse_url_list(&value))
        .unwrap_or_default()
}

fn parse_url_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}
