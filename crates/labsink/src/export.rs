// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Export engine: flushes pending records to removable media.
//!
//! Two entry points share one underlying save routine guarded by a single
//! mutual-exclusion domain: an idle-triggered background loop, and the
//! synchronous on-demand trigger used by the gateway. Records are merged
//! into one fixed-named JSON document at the volume root rather than
//! written to per-export timestamped files, so the medium carries a single
//! growing archive.

use crate::config::Config;
use crate::logbook::Logbook;
use crate::message::LabMessage;
use crate::store::MessageStore;
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod volume;

/// Well-known archive filename at the volume root.
pub const EXPORT_FILENAME: &str = "LabData.json";

/// Process-wide status of the last/ongoing write.
///
/// Written by the export engine (and touched by connection handlers when a
/// message is accepted), read by the gateway.
#[derive(Debug)]
pub struct ExportState {
    inner: parking_lot::Mutex<StateInner>,
}

#[derive(Debug, Clone)]
struct StateInner {
    last_received: DateTime<Utc>,
    last_write_status: String,
    last_write_time: Option<DateTime<Utc>>,
}

/// Read-only snapshot of [`ExportState`] for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct ExportStatus {
    pub last_received: DateTime<Utc>,
    pub last_write_status: String,
    pub last_write_time: Option<DateTime<Utc>>,
}

impl ExportState {
    /// Initial state: `Idle`, no write yet.
    pub fn new() -> Self {
        Self {
            inner: parking_lot::Mutex::new(StateInner {
                last_received: Utc::now(),
                last_write_status: "Idle".to_string(),
                last_write_time: None,
            }),
        }
    }

    /// Record that a valid message was just accepted.
    pub fn touch_received(&self) {
        self.inner.lock().last_received = Utc::now();
    }

    /// Time since the last accepted message.
    pub fn idle_elapsed(&self) -> Duration {
        let last = self.inner.lock().last_received;
        (Utc::now() - last).to_std().unwrap_or(Duration::ZERO)
    }

    /// Snapshot for the status surface.
    pub fn snapshot(&self) -> ExportStatus {
        let inner = self.inner.lock();
        ExportStatus {
            last_received: inner.last_received,
            last_write_status: inner.last_write_status.clone(),
            last_write_time: inner.last_write_time,
        }
    }

    fn set_status(&self, status: impl Into<String>) {
        self.inner.lock().last_write_status = status.into();
    }

    fn mark_saved(&self, at: DateTime<Utc>, status: String) {
        let mut inner = self.inner.lock();
        inner.last_write_status = status;
        inner.last_write_time = Some(at);
    }
}

impl Default for ExportState {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome code of an on-demand save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaveStatus {
    Success,
    NoMessages,
    TooSoon,
    UsbNotFound,
    Error,
}

/// Structured result of a save attempt.
#[derive(Debug, Clone, Serialize)]
pub struct SaveReport {
    pub success: bool,
    pub status_code: SaveStatus,
    pub message: String,
    pub messages_saved: usize,
}

impl SaveReport {
    fn new(status_code: SaveStatus, message: impl Into<String>, messages_saved: usize) -> Self {
        Self {
            success: status_code == SaveStatus::Success,
            status_code,
            message: message.into(),
            messages_saved,
        }
    }
}

/// Flushes the message store to a removable volume.
#[derive(Clone)]
pub struct ExportEngine {
    config: Arc<Config>,
    store: Arc<MessageStore>,
    state: Arc<ExportState>,
    logbook: Logbook,
    // Guards the whole drain-merge-write sequence, taken inside save_to so
    // every save path serializes on the destination file.
    save_lock: Arc<tokio::sync::Mutex<()>>,
    shutdown: Arc<tokio::sync::Notify>,
}

impl ExportEngine {
    /// Create an engine over shared store and state.
    pub fn new(
        config: Arc<Config>,
        store: Arc<MessageStore>,
        state: Arc<ExportState>,
        logbook: Logbook,
        shutdown: Arc<tokio::sync::Notify>,
    ) -> Self {
        Self {
            config,
            store,
            state,
            logbook,
            save_lock: Arc::new(tokio::sync::Mutex::new(())),
            shutdown,
        }
    }

    /// Shared export state handle.
    pub fn state(&self) -> Arc<ExportState> {
        Arc::clone(&self.state)
    }

    /// Idle-triggered background loop.
    ///
    /// Every polling interval, saves when no message has arrived for the
    /// idle threshold and the store is non-empty. Terminates on shutdown.
    pub async fn run(&self) {
        info!(
            "Export engine started (idle threshold {}s, poll {}s)",
            self.config.idle_threshold_secs, self.config.poll_interval_secs
        );

        // Registered once so a signal arriving mid-save is not lost.
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {
                    if !self.should_flush() {
                        continue;
                    }

                    let report = self.save_pending().await;
                    match report.status_code {
                        SaveStatus::Success => {
                            info!("Idle export saved {} messages", report.messages_saved);
                        }
                        SaveStatus::UsbNotFound => {
                            warn!("Idle export skipped: no USB drive detected");
                        }
                        SaveStatus::Error => {
                            warn!("Idle export failed: {}", report.message);
                        }
                        _ => debug!("Idle export: {}", report.message),
                    }
                }
                _ = &mut shutdown => {
                    debug!("Export engine shutting down");
                    break;
                }
            }
        }
    }

    /// True when the idle trigger should fire: the idle threshold has
    /// elapsed since the last accepted message and records are pending.
    fn should_flush(&self) -> bool {
        self.state.idle_elapsed() >= self.config.idle_threshold() && !self.store.is_empty()
    }

    /// On-demand save.
    ///
    /// Unless `force` is set, the call is rejected with `TOO_SOON` when a
    /// message arrived within the idle threshold, to avoid racing a burst of
    /// fresh data.
    pub async fn save_now(&self, force: bool) -> SaveReport {
        if !force && self.state.idle_elapsed() < self.config.idle_threshold() {
            return SaveReport::new(
                SaveStatus::TooSoon,
                "Save skipped: recent message received",
                0,
            );
        }

        self.save_pending().await
    }

    /// Resolve the target volume and save.
    async fn save_pending(&self) -> SaveReport {
        if self.store.is_empty() {
            return SaveReport::new(SaveStatus::NoMessages, "No messages to save", 0);
        }

        self.state.set_status("Writing to USB...");

        let Some(root) = volume::resolve(self.config.usb_path.as_deref()) else {
            warn!("No USB drive detected");
            self.logbook.warning("No USB drive detected", "export");
            self.state.set_status("USB not found");
            return SaveReport::new(SaveStatus::UsbNotFound, "Save failed: USB not found", 0);
        };

        self.save_to(&root).await
    }

    /// Merge pending records into the archive at `volume_root`.
    ///
    /// Holds the save lock for the whole drain-merge-write sequence, so
    /// concurrent callers serialize instead of losing each other's merge.
    /// The store is drained once; retries reuse the same snapshot. On
    /// exhaustion the drained messages are reported as an error outcome
    /// rather than silently dropped.
    pub async fn save_to(&self, volume_root: &Path) -> SaveReport {
        let _guard = self.save_lock.lock().await;

        let path = volume_root.join(EXPORT_FILENAME);
        let snapshot = self.store.drain_snapshot();
        if snapshot.is_empty() {
            return SaveReport::new(SaveStatus::NoMessages, "No messages to save", 0);
        }
        let count = snapshot.len();

        // Clamped so an unvalidated zero still yields one attempt.
        let mut attempts_left = self.config.write_retries.max(1);
        loop {
            match merge_and_write(&path, &snapshot).await {
                Ok(()) => {
                    let now = Utc::now();
                    let status = format!("Saved at {}", now.format("%H:%M:%S"));
                    self.state.mark_saved(now, status.clone());
                    info!("Saved {} messages to {}", count, path.display());
                    self.logbook
                        .info(format!("Saved {} messages to {}", count, path.display()), "export");
                    return SaveReport::new(SaveStatus::Success, status, count);
                }
                Err(e) => {
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        warn!("Export write failed, giving up: {:#}", e);
                        self.logbook
                            .error(format!("Export write failed: {:#}", e), "export");
                        self.state.set_status("Error writing to USB");
                        return SaveReport::new(
                            SaveStatus::Error,
                            format!("Save failed: {}", e),
                            0,
                        );
                    }

                    warn!(
                        "Retrying USB write ({} attempts left): {:#}",
                        attempts_left, e
                    );
                    self.logbook.warning("Retrying USB write", "export");
                    self.state
                        .set_status(format!("Retrying write... {} attempts left", attempts_left));
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        }
    }
}

/// One write attempt: read-merge-replace the archive file.
///
/// A parse failure of the existing archive is a retryable error, not a
/// silent data-loss path.
async fn merge_and_write(path: &Path, snapshot: &[LabMessage]) -> Result<()> {
    let mut all: Vec<LabMessage> = match tokio::fs::read_to_string(path).await {
        Ok(existing) => {
            serde_json::from_str(&existing).context("existing archive is not a valid record list")?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e).context("read existing archive"),
    };

    all.extend_from_slice(snapshot);

    let json = serde_json::to_string_pretty(&all).context("serialize records")?;
    tokio::fs::write(path, json).await.context("write archive")?;
    Ok(())
}
