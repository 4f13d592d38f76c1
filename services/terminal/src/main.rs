//! CDEF terminal entry point

use anyhow::{Context, Result};
use cdef_config::CommsConfig;
use cdef_terminal::TerminalNode;
use clap::Parser;
use dispatcher::Dispatcher;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "CDEF terminal node", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "services/terminal/config/terminal.toml")]
    config: PathBuf,

    /// Log level, overrides the configured one (RUST_LOG still wins)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = CommsConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CDEF terminal");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        connections = config.connections.len(),
        sessions = config.sessions.len(),
        listener = ?config.listener.as_ref().map(|l| l.bind.as_str()),
        "Configuration loaded"
    );

    let dispatcher = Dispatcher::new();
    let loop_task = dispatcher.spawn();
    let node = TerminalNode::build(&config, &dispatcher)?;
    node.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C signal handler")?;
    info!("Shutdown signal received");

    node.shutdown();
    match tokio::time::timeout(config.dispatcher.stop_timeout(), loop_task).await {
        Ok(Ok(())) => info!("Terminal stopped"),
        Ok(Err(e)) => warn!(error = %e, "dispatcher task failed"),
        Err(_) => warn!(
            timeout_ms = config.dispatcher.stop_timeout_ms,
            "dispatcher did not stop in time"
        ),
    }
    Ok(())
}
