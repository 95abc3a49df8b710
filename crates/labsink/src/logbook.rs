// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Structured log sink shared by the server, export engine, and gateway.
//!
//! Keeps a bounded in-memory ring of recent entries for the HTTP surface and
//! appends every entry to a log file so records survive restarts.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Entries kept in memory before the oldest is evicted.
const RING_CAPACITY: usize = 1000;

/// Log severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// A recorded log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub context: Option<String>,
}

#[derive(Debug)]
struct Inner {
    entries: Mutex<VecDeque<LogEntry>>,
    file: Option<PathBuf>,
}

/// Shared handle to the log sink. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Logbook {
    inner: Arc<Inner>,
}

impl Logbook {
    /// Create a logbook that appends to `file` (parent directories are
    /// created on first write).
    pub fn new(file: PathBuf) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
                file: Some(file),
            }),
        }
    }

    /// Create a logbook with no file sink (tests).
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
                file: None,
            }),
        }
    }

    /// Record an entry.
    pub fn record(&self, level: LogLevel, message: impl Into<String>, context: Option<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            context,
        };

        {
            let mut entries = self.inner.entries.lock();
            if entries.len() == RING_CAPACITY {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        if let Some(path) = &self.inner.file {
            if let Err(e) = append_line(path, &entry) {
                tracing::debug!("Logbook file append failed: {}", e);
            }
        }
    }

    /// Record an INFO entry.
    pub fn info(&self, message: impl Into<String>, context: impl Into<String>) {
        self.record(LogLevel::Info, message, Some(context.into()));
    }

    /// Record a WARNING entry.
    pub fn warning(&self, message: impl Into<String>, context: impl Into<String>) {
        self.record(LogLevel::Warning, message, Some(context.into()));
    }

    /// Record an ERROR entry.
    pub fn error(&self, message: impl Into<String>, context: impl Into<String>) {
        self.record(LogLevel::Error, message, Some(context.into()));
    }

    /// Snapshot of the retained entries, oldest first.
    pub fn recent(&self) -> Vec<LogEntry> {
        self.inner.entries.lock().iter().cloned().collect()
    }
}

fn append_line(path: &std::path::Path, entry: &LogEntry) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    writeln!(
        file,
        "{} [{}] ({}) {}",
        entry.timestamp.to_rfc3339(),
        entry.level,
        entry.context.as_deref().unwrap_or("-"),
        entry.message
    )
}
