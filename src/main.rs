use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tenso::config::{ApiConfig, Config};
use tenso::server::Server;
use tenso::Tenso;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hypermedia REST server
#[derive(Debug, Parser)]
#[command(name = "tenso", version, about)]
struct Cli {
    /// JSON API configuration file (overrides TENSO_CONFIG)
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on (overrides BIND_ADDR)
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Load configuration from environment
    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tenso={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind_addr = cli.bind.unwrap_or(config.bind_addr);
    let api_config = match cli.config.or(config.api_config_path) {
        Some(path) => {
            tracing::info!("Loading API configuration from {}", path);
            ApiConfig::from_file(&path)?
        }
        None => {
            tracing::warn!("No API configuration given, serving defaults with no routes");
            ApiConfig::default()
        }
    };

    tracing::info!("Starting tenso service");
    tracing::info!(
        "Configuration: bind_address={}, rate_limiting={}, renderers={:?}",
        bind_addr,
        api_config.rate.enabled,
        api_config.renderers
    );

    let tenso = Tenso::builder(api_config)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build request pipeline: {}", e))?;

    Server::new(Arc::new(tenso), bind_addr)
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
