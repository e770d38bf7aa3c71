//! Server binary: configuration from the environment, tracing to stderr.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tripcover_rs::{AppConfig, orchestrator::Assistant};
use tripcover_web::{WebConfig, spawn_web};

/// Conversational travel-insurance assistant server.
#[derive(Parser, Debug)]
#[command(name = "tripcover-server", version, about)]
struct Args {
    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "127.0.0.1:3001")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env()?;
    let webhook_secret = config.webhook_signing_secret.clone();
    let assistant = Arc::new(Assistant::from_config(config)?);

    let addr = spawn_web(
        assistant,
        webhook_secret,
        WebConfig {
            bind_addr: args.bind,
        },
    )
    .await?;
    tracing::info!("chat API listening on http://{addr}");

    // Serve until interrupted.
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
