//! # chathub
//!
//! Chat hub server binary: loads settings, starts the WebSocket server, and
//! shuts the hub down cleanly on Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chathub_core::logging;
use chathub_settings::{ChatHubSettings, LogFormat, load_settings_from_path, settings_path};
use chathub_server::{ChatServer, Hub, HubConfig, ServerConfig};
use clap::Parser;

/// Chat hub server.
#[derive(Parser, Debug)]
#[command(name = "chathub", about = "Real-time chat hub over WebSocket")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `$CONFIG_PATH` or `~/.chathub/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn load_settings(&self) -> Result<ChatHubSettings> {
        let path = self.config.clone().unwrap_or_else(settings_path);
        let mut settings = load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

fn init_logging(settings: &ChatHubSettings) {
    match settings.logging.format {
        LogFormat::Compact => logging::init_subscriber(&settings.logging.level),
        LogFormat::Json => logging::init_json_subscriber(&settings.logging.level),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;
    init_logging(&settings);

    let hub = Arc::new(Hub::new(HubConfig::from(&settings.hub)));
    let mut server = ChatServer::new(ServerConfig::from(&settings.server), Arc::clone(&hub));
    match chathub_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(err) => tracing::warn!(error = %err, "metrics disabled"),
    }

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;
    tracing::info!(
        policy = settings.hub.overflow_policy.as_str(),
        queue = settings.hub.send_queue_capacity,
        "chathub listening on ws://{addr}/ws"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    hub.shutdown().await;
    if let Err(err) = handle.await {
        tracing::warn!(error = %err, "server task ended abnormally");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
