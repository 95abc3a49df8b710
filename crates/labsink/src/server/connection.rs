// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection handling: buffering, the frame pipeline, and control-byte
//! responses.

use super::abuse::AbuseTracker;
use super::framing::{self, Frame};
use super::security;
use crate::config::Config;
use crate::export::ExportState;
use crate::logbook::Logbook;
use crate::message::LabMessage;
use crate::store::MessageStore;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Positive acknowledgment.
pub const ACK: u8 = 0x06;

/// Negative acknowledgment.
pub const NAK: u8 = 0x15;

/// End of transmission, sent before a forced close when a peer is blocked.
pub const EOT: u8 = 0x04;

const READ_CHUNK: usize = 4096;

/// Upper bound on unframed bytes held for one connection. Real frames are
/// well under 100 bytes; anything this large without an ETX is noise.
const MAX_BUFFER: usize = 2 * READ_CHUNK;

enum Verdict {
    Accepted(LabMessage),
    Rejected(&'static str),
}

/// Owns one accepted connection until it closes.
pub(crate) struct ConnectionHandler {
    stream: TcpStream,
    peer: IpAddr,
    buffer: String,
    config: Arc<Config>,
    store: Arc<MessageStore>,
    abuse: Arc<AbuseTracker>,
    state: Arc<ExportState>,
    logbook: Logbook,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        peer: IpAddr,
        config: Arc<Config>,
        store: Arc<MessageStore>,
        abuse: Arc<AbuseTracker>,
        state: Arc<ExportState>,
        logbook: Logbook,
    ) -> Self {
        Self {
            stream,
            peer,
            buffer: String::new(),
            config,
            store,
            abuse,
            state,
            logbook,
        }
    }

    /// Drive the connection until the peer disconnects, an I/O fault occurs,
    /// the peer gets blocked, or shutdown is signalled.
    ///
    /// The socket closes exactly once, when `self` drops.
    pub async fn run(mut self, shutdown: Arc<tokio::sync::Notify>) {
        let mut chunk = vec![0u8; READ_CHUNK];
        let shutdown = shutdown.notified();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                read = timeout(self.config.io_timeout(), self.stream.read(&mut chunk)) => {
                    match read {
                        Err(_) => {
                            debug!("Receive timeout from {}", self.peer);
                            break;
                        }
                        Ok(Err(e)) => {
                            warn!("Client connection reset: {}: {}", self.peer, e);
                            break;
                        }
                        Ok(Ok(0)) => {
                            info!("Client disconnected gracefully: {}", self.peer);
                            break;
                        }
                        Ok(Ok(n)) => {
                            self.buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
                            if !self.process_buffer().await {
                                break;
                            }
                        }
                    }
                }
                _ = &mut shutdown => {
                    debug!("Connection handler shutting down: {}", self.peer);
                    break;
                }
            }
        }
    }

    /// Run the extract-filter-validate-respond pipeline until no complete
    /// frame remains. Returns `false` when the connection must close.
    async fn process_buffer(&mut self) -> bool {
        loop {
            match framing::next_frame(&mut self.buffer) {
                Frame::Incomplete => {
                    if self.buffer.len() <= MAX_BUFFER {
                        return true;
                    }
                    warn!("Receive buffer overflow from {}, discarding", self.peer);
                    self.logbook
                        .warning("Receive buffer overflow", format!("client {}", self.peer));
                    self.buffer.clear();
                    if !self.send(NAK).await {
                        return false;
                    }
                    return self.register_error().await;
                }
                Frame::Malformed => {
                    warn!("Malformed message from {}", self.peer);
                    self.logbook
                        .warning("Malformed message", format!("client {}", self.peer));
                    if !self.send(NAK).await {
                        return false;
                    }
                    // The buffer was discarded; stop until more bytes arrive.
                    return self.register_error().await;
                }
                Frame::Complete(payload) => match self.evaluate(&payload) {
                    Verdict::Accepted(message) => {
                        debug!("Valid message from {}: {}", self.peer, payload);
                        self.logbook
                            .info("Valid message", format!("client {}", self.peer));
                        self.store.add(message);
                        self.state.touch_received();
                        if !self.send(ACK).await {
                            return false;
                        }
                    }
                    Verdict::Rejected(reason) => {
                        warn!("{} from {}: {}", reason, self.peer, payload);
                        self.logbook
                            .warning(reason, format!("client {}", self.peer));
                        if !self.send(NAK).await {
                            return false;
                        }
                        if !self.register_error().await {
                            return false;
                        }
                    }
                },
            }
        }
    }

    /// Security filter, rate limiter, then grammar validation, in that
    /// order.
    fn evaluate(&self, payload: &str) -> Verdict {
        if security::is_suspicious(payload) {
            return Verdict::Rejected("Malicious input");
        }

        if self.abuse.check_rate_limit(self.peer) {
            return Verdict::Rejected("Rate limit exceeded");
        }

        match LabMessage::parse(payload) {
            Some(message) => Verdict::Accepted(message),
            None => Verdict::Rejected("Invalid message"),
        }
    }

    /// Count one rejection. When that pushes the peer over the block
    /// threshold, send EOT and report the connection as finished.
    async fn register_error(&mut self) -> bool {
        if self.abuse.register_error(self.peer) {
            warn!("Too many errors from {}, now blocking", self.peer);
            self.logbook
                .warning("Client blocked", format!("client {}", self.peer));
            let _ = timeout(self.config.io_timeout(), self.stream.write_all(&[EOT])).await;
            return false;
        }
        true
    }

    /// Write one control byte, bounded by the send timeout.
    async fn send(&mut self, byte: u8) -> bool {
        match timeout(self.config.io_timeout(), self.stream.write_all(&[byte])).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Failed to send response to {}: {}", self.peer, e);
                false
            }
            Err(_) => {
                warn!("Send timeout to {}", self.peer);
                false
            }
        }
    }
}
