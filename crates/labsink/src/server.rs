// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP listener and connection lifecycle management.

use crate::config::Config;
use crate::export::ExportState;
use crate::logbook::Logbook;
use crate::store::MessageStore;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub mod abuse;
pub mod connection;
pub mod framing;
pub mod security;

pub use abuse::AbuseTracker;
use connection::ConnectionHandler;

/// The instrument-facing TCP server.
///
/// Accepts connections on the configured endpoint, rejects blocked source
/// addresses before any bytes are read, and spawns one independent handler
/// task per accepted connection.
#[derive(Clone)]
pub struct LabServer {
    config: Arc<Config>,
    store: Arc<MessageStore>,
    abuse: Arc<AbuseTracker>,
    state: Arc<ExportState>,
    logbook: Logbook,
    shutdown: Arc<tokio::sync::Notify>,
    running: Arc<AtomicBool>,
    local_addr: Arc<parking_lot::Mutex<Option<SocketAddr>>>,
}

impl LabServer {
    /// Create a server over shared store and export state.
    pub fn new(
        config: Arc<Config>,
        store: Arc<MessageStore>,
        state: Arc<ExportState>,
        logbook: Logbook,
        shutdown: Arc<tokio::sync::Notify>,
    ) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let abuse = Arc::new(AbuseTracker::new(
            config.rate_window(),
            config.rate_limit_threshold,
            config.block_threshold,
        ));

        Ok(Self {
            config,
            store,
            abuse,
            state,
            logbook,
            shutdown,
            running: Arc::new(AtomicBool::new(false)),
            local_addr: Arc::new(parking_lot::Mutex::new(None)),
        })
    }

    /// Run the accept loop until shutdown.
    ///
    /// Per-connection errors never end the loop; only a fatal bind error or
    /// the shutdown signal do. The listening socket is released when the
    /// loop exits, on every exit path.
    pub async fn run(&self) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                error!("TCP listener fatal error: {}", e);
                self.logbook.error("TCP listener fatal error", "server");
                return Err(ServerError::Bind(e.to_string()));
            }
        };
        *self.local_addr.lock() = listener.local_addr().ok();

        info!("TCP server listening on {}", addr);
        self.logbook.info("TCP listener started", "server");

        // Registered once so a signal arriving mid-accept is not lost.
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let peer_ip = peer_addr.ip();

                            if self.abuse.is_blocked(peer_ip) {
                                warn!("Blocked IP attempted connection: {}", peer_ip);
                                self.logbook.warning(
                                    "Blocked IP attempted connection",
                                    format!("client {}", peer_ip),
                                );
                                // Closed without reading a single byte.
                                drop(stream);
                                continue;
                            }

                            info!("New connection from {}", peer_addr);
                            let handler = ConnectionHandler::new(
                                stream,
                                peer_ip,
                                Arc::clone(&self.config),
                                Arc::clone(&self.store),
                                Arc::clone(&self.abuse),
                                Arc::clone(&self.state),
                                self.logbook.clone(),
                            );
                            let shutdown = Arc::clone(&self.shutdown);

                            tokio::spawn(async move {
                                handler.run(shutdown).await;
                                info!("Client disconnected: {}", peer_addr);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping TCP server");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("TCP listener stopped");
        self.logbook.info("TCP listener stopped", "server");
        Ok(())
    }

    /// Signal the server (and its handlers) to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Check if the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Actual bound address, once the listener is up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Shared abuse tracker handle.
    pub fn abuse(&self) -> Arc<AbuseTracker> {
        Arc::clone(&self.abuse)
    }
}

/// Server error types.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("bind error: {0}")]
    Bind(String),
    #[error("server already running")]
    AlreadyRunning,
}
