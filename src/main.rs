//! registry-proxy - a reverse proxy for OCI/Docker container registries
//!
//! This is the main entry point for the registry-proxy application.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use registry_proxy::auth::{SecretKey, TokenCipher};
use registry_proxy::config::Config;
use registry_proxy::proxy::{
    upstream_client, ProxyTable, RegistryProxy, TokenEndpoints, TokenProxy,
};
use registry_proxy::server::{AppState, Server};

/// registry-proxy - a namespace- and token-rewriting proxy for container registries
#[derive(Parser, Debug)]
#[command(name = "registry-proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "CONFIG_PATH", default_value = "./config.yaml")]
    config: String,

    /// Log level, overriding the configuration file
    #[arg(long)]
    loglevel: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", args.config, e))?;

    init_tracing(args.loglevel.as_deref().unwrap_or(&config.log_level));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config,
        "Starting registry-proxy"
    );
    config.log_summary();

    let key = SecretKey::from_hex(&config.secret_key)
        .map_err(|e| anyhow::anyhow!("Failed to parse secret key: {}", e))?;
    let cipher = Arc::new(TokenCipher::new(&key));
    let client = upstream_client();

    // One probe per unique upstream host; any failure aborts startup
    let endpoints = Arc::new(TokenEndpoints::discover(&client, &config).await?);
    let table = Arc::new(ProxyTable::new(&config));
    let config = Arc::new(config);

    let state = AppState {
        config: Arc::clone(&config),
        table: Arc::clone(&table),
        token_proxy: Arc::new(TokenProxy::new(
            table,
            endpoints,
            Arc::clone(&cipher),
            client.clone(),
            config.proxy_fqdn.clone(),
        )),
        registry_proxy: Arc::new(RegistryProxy::new(
            cipher,
            client,
            config.proxy_fqdn.clone(),
        )),
    };

    let server = Server::new(&config, state);
    info!(
        addr = %config.listen_addr,
        port = config.listen_port(),
        "Starting HTTP server"
    );

    server.run(shutdown_signal()).await?;

    info!("registry-proxy shutdown complete");
    Ok(())
}

/// Initialize the tracing subscriber from the configured log level
fn init_tracing(level: &str) {
    let level = if level.is_empty() { "info" } else { level };
    let filter = EnvFilter::try_new(level.to_lowercase())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
