use std::path::Path;

use axum::body::Body;
use clap::Parser;
use cluster_transport::{
    Client,
    config::{TransportConfig, TransportConfigValidator, load_config},
    tracing_setup,
};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use http_body_util::BodyExt;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,

    /// Configuration file (YAML, JSON or TOML); environment overrides apply
    #[clap(short, long, global = true)]
    config: Option<String>,

    /// Log filter, for example `info` or `cluster_transport=debug`
    #[clap(long, default_value = "warn", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    json_logs: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Send one request through the transport and print the response
    Request {
        /// HTTP method
        #[clap(short = 'X', long, default_value = "GET")]
        method: String,
        /// Request path, for example /_cluster/health
        path: String,
        /// Request body
        #[clap(short, long)]
        data: Option<String>,
    },
    /// Discover cluster nodes and print the connection snapshot as JSON
    Nodes,
    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    tracing_setup::init_tracing_with_config(&args.log_level, args.json_logs, args.json_logs)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    let config_path = args.config.as_deref();
    match args.command {
        Commands::Validate => validate_config_command(config_path).await,
        Commands::Nodes => nodes_command(config_path).await,
        Commands::Request { method, path, data } => {
            request_command(config_path, &method, &path, data).await
        }
    }
}

async fn load(config_path: Option<&str>) -> Result<TransportConfig> {
    if let Some(path) = config_path {
        if !Path::new(path).exists() {
            return Err(eyre!("Configuration file '{path}' not found"));
        }
    }
    load_config(config_path)
        .await
        .wrap_err("Failed to load transport configuration")
}

async fn request_command(
    config_path: Option<&str>,
    method: &str,
    path: &str,
    data: Option<String>,
) -> Result<()> {
    let config = load(config_path).await?;
    let client = Client::from_config(config).context("Failed to create transport client")?;

    let method = http::Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {method}"))?;
    let mut builder = http::Request::builder().method(method).uri(path);
    if data.is_some() {
        builder = builder.header(http::header::CONTENT_TYPE, "application/json");
    }
    let request = builder
        .body(data.map(Body::from).unwrap_or_else(Body::empty))
        .context("Failed to build request")?;

    let response = client.perform(request).await.context("Request failed")?;
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .context("Failed to read response body")?
        .to_bytes();

    println!("{status}");
    println!("{}", String::from_utf8_lossy(&body));
    client.close();
    Ok(())
}

async fn nodes_command(config_path: Option<&str>) -> Result<()> {
    let mut config = load(config_path).await?;
    config.enable_metrics = true;
    let client = Client::from_config(config).context("Failed to create transport client")?;

    client
        .discover_nodes()
        .await
        .context("Node discovery failed")?;

    let snapshot = client.metrics().context("Failed to read connection snapshot")?;
    let json = serde_json::to_string_pretty(&snapshot.connections)
        .context("Failed to serialize connection snapshot")?;
    println!("{json}");
    client.close();
    Ok(())
}

async fn validate_config_command(config_path: Option<&str>) -> Result<()> {
    let source = config_path.unwrap_or("environment");
    println!("🔍 Validating configuration: {source}");

    let config = match load(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match TransportConfigValidator::validate(&config) {
        Ok(settings) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Seed URLs: {}", settings.urls.len());
            println!("   • Max Retries: {}", settings.max_retries);
            println!("   • Retry On Status: {:?}", settings.retry_on_status);
            println!("   • Compression: {}", settings.compress_request_body);
            println!(
                "   • Discovery Interval: {}",
                settings
                    .discover_nodes_interval
                    .map(|d| format!("{}s", d.as_secs()))
                    .unwrap_or_else(|| "disabled".to_string())
            );
            println!("   • Router: {:?}", settings.router);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
