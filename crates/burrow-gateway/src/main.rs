//! burrow gateway daemon

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burrow_core::config::{self, ServerConfig};
use burrow_gateway::TunnelServer;

#[derive(Parser)]
#[command(name = "burrow-gateway")]
#[command(about = "SSH tunnels over HTTP upgrade with dynamic reverse proxying")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen host (overrides config)
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Seed for a deterministic host key
    #[arg(long, env = "BURROW_KEY")]
    key_seed: Option<String>,

    /// Inline credential, `name:secret`
    #[arg(long, env = "AUTH")]
    auth: Option<String>,

    /// JSON credential file
    #[arg(long)]
    authfile: Option<PathBuf>,

    /// Fixed backend for non-tunnel traffic
    #[arg(long)]
    proxy: Option<String>,

    /// Log every request
    #[arg(short, long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.key_seed.is_some() {
            config.key_seed = self.key_seed;
        }
        if self.auth.is_some() {
            config.auth = self.auth;
        }
        if self.authfile.is_some() {
            config.auth_file = self.authfile;
        }
        if self.proxy.is_some() {
            config.proxy = self.proxy;
        }
        config.verbose |= self.verbose;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => config::load_config::<ServerConfig>(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => {
            tracing::info!("Using default configuration");
            ServerConfig::default()
        }
    };
    args.apply(&mut config);

    let host = config.host.clone();
    let port = config.port;

    let server = TunnelServer::builder(config)
        .build()
        .await
        .context("Failed to create server")?;

    let server = Arc::new(server);
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let watcher = Arc::clone(&server);
    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        tracing::info!("Received {}, initiating shutdown...", signal);
        cancel_clone.cancel();

        let signal = shutdown_signal().await;
        tracing::warn!("Received {} again, closing open connections", signal);
        watcher.close();
    });

    server
        .start_with_cancel(cancel, &host, port)
        .await
        .context("Failed to start server")?;
    server.wait().await?;

    tracing::info!("Gateway shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM, naming the signal received
async fn shutdown_signal() -> &'static str {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "Ctrl+C",
        _ = terminate => "SIGTERM",
    }
}
