// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! labsink daemon
//!
//! Lab instrument telemetry acquisition over STX/ETX-framed TCP with
//! idle-triggered export to removable media and an HTTP status surface.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (TCP 12377, HTTP 8080, auto-detected USB)
//! labsink
//!
//! # Custom ports and an explicit USB mount point
//! labsink --port 14000 --http-port 9000 --usb-path /media/usb
//!
//! # Load settings from a JSON config file
//! labsink --config labsink.json
//! ```

use anyhow::Result;
use clap::Parser;
use labsink::export::{ExportEngine, ExportState};
use labsink::gateway::{self, AppState};
use labsink::logbook::Logbook;
use labsink::store::MessageStore;
use labsink::{Config, LabServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Lab telemetry acquisition service
#[derive(Parser, Debug)]
#[command(name = "labsink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port the instrument protocol listens on
    #[arg(short, long, default_value = "12377")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// HTTP port for the status surface
    #[arg(long, default_value = "8080")]
    http_port: u16,

    /// Removable-volume mount point (auto-detected when omitted)
    #[arg(short, long)]
    usb_path: Option<PathBuf>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Load or assemble config
    let config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        Config::from_file(&config_path)?
    } else {
        Config {
            bind_address: args.bind.parse()?,
            port: args.port,
            http_port: args.http_port,
            usb_path: args.usb_path,
            ..Default::default()
        }
    };
    let config = Arc::new(config);

    info!("+----------------------------------------------------+");
    info!(
        "|       labsink v{}                               |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  TCP:    {:40} |", format!("{}:{}", config.bind_address, config.port));
    info!("|  HTTP:   {:40} |", format!("{}:{}", config.bind_address, config.http_port));
    info!(
        "|  USB:    {:40} |",
        config
            .usb_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "auto-detect".to_string())
    );
    info!("|  Idle:   {:40} |", format!("{}s", config.idle_threshold_secs));
    info!("+----------------------------------------------------+");

    // Shared state
    let store = Arc::new(MessageStore::new());
    let export_state = Arc::new(ExportState::new());
    let logbook = Logbook::new(config.log_file.clone());
    let shutdown = Arc::new(tokio::sync::Notify::new());

    let server = LabServer::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&export_state),
        logbook.clone(),
        Arc::clone(&shutdown),
    )?;

    let engine = ExportEngine::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&export_state),
        logbook.clone(),
        Arc::clone(&shutdown),
    );

    // HTTP status surface
    let app_state = Arc::new(AppState {
        engine: engine.clone(),
        abuse: server.abuse(),
        logbook: logbook.clone(),
        tcp_port: config.port,
    });
    let router = gateway::router(app_state);
    let http_addr = format!("{}:{}", config.bind_address, config.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;
    info!("HTTP status surface on {}", http_addr);

    let http_shutdown = Arc::clone(&shutdown);
    let http_task = tokio::spawn(async move {
        axum::serve(http_listener, router)
            .with_graceful_shutdown(async move {
                http_shutdown.notified().await;
            })
            .await
    });

    // Handle shutdown signal
    let signal_shutdown = Arc::clone(&shutdown);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping...");
        signal_shutdown.notify_waiters();
    });

    // Run the export loop and the TCP server until shutdown
    let engine_task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };

    let result = server.run().await;
    // Covers the fatal-bind path, where no ctrl_c ever fired.
    shutdown.notify_waiters();
    engine_task.await?;
    http_task.await??;
    result?;

    info!("labsink stopped");
    Ok(())
}
