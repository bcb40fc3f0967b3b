//! gatelink probe
//!
//! Opens the configured sessions, logs every lifecycle event and inbound
//! frame, and keeps the session count up with a periodic health check.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use gatelink_client::{
    ClientConfig, ClientError, ConnectionManager, EventListener, MessagePool, RawCodec, Session,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gatelink-probe")]
#[command(about = "Connect to game servers and log session lifecycle")]
#[command(version)]
struct Cli {
    /// TOML client configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Health check period in milliseconds
    #[arg(short, long, default_value_t = 5000, value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Every raw frame routes under id 0
struct AcceptAll;

impl MessagePool<Bytes> for AcceptAll {
    fn message_id(&self, _message: &Bytes) -> Option<u32> {
        Some(0)
    }
}

struct LogListener;

impl EventListener for LogListener {
    fn on_connected(&self, session: &Arc<Session>) {
        tracing::info!("connected: {} -> {}", session.id(), session.endpoint());
    }

    fn on_disconnected(&self, session: &Arc<Session>) {
        tracing::info!("disconnected: {} ({:?})", session.id(), session.state());
    }

    fn on_exception(&self, session: &Arc<Session>, cause: &ClientError) {
        tracing::warn!("exception on {}: {}", session.id(), cause);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let text = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    let config = ClientConfig::from_toml_str(&text)?;

    let manager = ConnectionManager::<Bytes>::builder(
        Arc::new(RawCodec),
        Arc::new(AcceptAll),
        Arc::new(|frame: Bytes, session: &Arc<Session>| {
            tracing::info!("{} bytes from {}", frame.len(), session.id());
        }),
    )
    .listener(Arc::new(LogListener))
    .config(config)
    .build();

    let opened = manager.run().await;
    tracing::info!("{} session(s) open", opened);

    let health = manager.spawn_health_check(Duration::from_millis(cli.interval_ms));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    manager.stop().await;
    let _ = health.await;

    Ok(())
}
