//! # eio
//!
//! Engine server binary: loads settings, installs logging, and serves an
//! echo endpoint until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use eio_logging::{LoggingConfig, init_logging};
use eio_server::{Server, ServerConfig};
use eio_settings::{EngineSettings, load_settings};
use tracing::{debug, info};

/// Engine.IO-style realtime server.
#[derive(Parser, Debug)]
#[command(name = "eio", about = "Engine.IO-style realtime server")]
struct Cli {
    /// Settings file (JSON). Missing file means defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

impl Cli {
    fn apply(&self, settings: &mut EngineSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref()).context("Failed to load settings")?;
    cli.apply(&mut settings);

    let logging = LoggingConfig::from_settings(&settings.logging)?;
    init_logging(&logging).context("Failed to initialize logging")?;

    let server = Server::new(ServerConfig::from_settings(&settings));
    server.on_connection(|session| {
        debug!(sid = %session.id(), transport = %session.transport_kind(), "client connected");
        let echo = session.clone();
        session.on_message(move |payload| {
            let echo = echo.clone();
            drop(tokio::spawn(async move {
                if let Err(error) = echo.send(payload).await {
                    debug!(sid = %echo.id(), %error, "echo dropped");
                }
            }));
        });
    });

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!(
        "eio listening on http://{addr}{}",
        server.config().base_path
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    if server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(Duration::from_secs(10)))
        .await
    {
        info!("Shutdown complete");
    }
    Ok(())
}
