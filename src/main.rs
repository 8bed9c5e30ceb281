//! live-inference - Real-time visual inference client
//!
//! Captures camera stills on a fixed interval, streams them to a remote
//! inference service over Socket.IO and renders the returned detections as
//! overlay regions.

mod app;
mod capture;
mod config;
mod error;
mod overlay;
mod permission;
mod shared;
#[cfg(test)]
mod testing;
mod transport;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::{InferenceView, ViewOptions};
use crate::capture::FileCamera;
use crate::config::AppConfig;
use crate::overlay::render_lines;
use crate::shared::{SharedViewState, ViewCommand};
use crate::transport::SocketIoConnector;

/// live-inference - Real-time visual inference client
#[derive(Parser, Debug)]
#[command(name = "live-inference")]
#[command(about = "Stream camera frames to a remote inference service and show detections")]
struct Args {
    /// Configuration file (defaults to config.toml in the config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Inference service address (host:port)
    #[arg(short, long)]
    server: Option<String>,

    /// Capture interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Image file or directory served as the camera
    #[arg(long)]
    source: Option<PathBuf>,

    /// Start streaming as soon as camera permission is granted
    #[arg(long)]
    autostart: bool,

    /// Log filter (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Write the effective configuration to this file and exit
    #[arg(long, value_name = "PATH")]
    save_config: Option<PathBuf>,
}

impl Args {
    /// Command-line flags take precedence over the config file
    fn apply(&self, config: &mut AppConfig) {
        if let Some(server) = &self.server {
            config.server.address = server.clone();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.capture.interval_ms = interval_ms;
        }
        if let Some(source) = &self.source {
            config.capture.source = Some(source.clone());
        }
        if self.autostart {
            config.capture.autostart = true;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level filter")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut config = config::resolve_config(args.config.as_deref())?;
    args.apply(&mut config);

    if let Some(path) = &args.save_config {
        config::save_config(&config, path)
            .with_context(|| format!("failed to save config to {}", path.display()))?;
        info!("Configuration written to {}", path.display());
        return Ok(());
    }

    let source = config
        .capture
        .source
        .clone()
        .context("no camera source configured; pass --source <image file or directory>")?;
    let camera = FileCamera::open(&source)?;

    info!("live-inference starting...");
    info!("Inference service: {}", config.server.address);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run(config, camera));

    info!("live-inference shutdown complete");
    Ok(())
}

async fn run(config: AppConfig, camera: FileCamera) {
    let connector = SocketIoConnector::new(Duration::from_millis(config.server.handshake_timeout_ms));
    let view = InferenceView::new(ViewOptions::from(&config), Arc::new(camera), Arc::new(connector));
    let state = view.state();

    let shutdown = CancellationToken::new();
    let (commands, rx) = mpsc::channel(16);

    tokio::spawn(read_commands(commands));
    tokio::spawn(render(state, shutdown.clone()));

    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            interrupt.cancel();
        }
    });

    println!("Commands: start | stop | retry | reconnect | status | quit");
    view.run(rx, shutdown.clone()).await;
    shutdown.cancel();
}

/// Forward terminal lines to the view as commands
async fn read_commands(commands: mpsc::Sender<ViewCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read command: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match ViewCommand::from_input(&line) {
            Some(command) => {
                if commands.send(command).await.is_err() {
                    break;
                }
            }
            None => warn!("Unknown command '{}'", line.trim()),
        }
    }
}

/// Print the view whenever a new snapshot is published
async fn render(state: SharedViewState, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut seen = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = state.read().clone();
        if snapshot.revision == seen {
            continue;
        }
        seen = snapshot.revision;

        println!("{}", snapshot.summary());
        println!("  {}", snapshot.results_text);
        for line in render_lines(&snapshot.regions) {
            println!("    {}", line);
        }
        if let Some(error) = &snapshot.last_error {
            println!("  last error: {}", error);
        }
    }
}
