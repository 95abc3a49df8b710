// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! labsink - lab instrument telemetry acquisition.
//!
//! Ingests instrument readings over raw TCP using STX/ETX delimiter
//! framing, validates and rate-limits each message, accumulates valid
//! records in memory, and exports them to removable media on idle or on
//! demand. Designed for devices that cannot assume a reliable network or a
//! well-behaved client population.
//!
//! # Architecture
//!
//! ```text
//! LabServer (TCP accept loop, block-list gate)
//! +-- ConnectionHandler      (framing -> filter -> rate limit -> validate)
//! +-- MessageStore           (append-only, drain-to-snapshot)
//! +-- AbuseTracker           (per-address stats, permanent block list)
//! ExportEngine               (idle-triggered + on-demand USB export)
//! gateway                    (HTTP status surface: /status, /save, /logs)
//! ```
//!
//! # Wire protocol
//!
//! Frames are `STX (0x02) <payload> ETX (0x03)` with a pipe-separated
//! payload `<PatientId>|<TestName>|<Value>|<Unit>`. Every frame is answered
//! with a single control byte: ACK (0x06), NAK (0x15), or EOT (0x04)
//! immediately before a blocked peer's connection is closed.

pub mod config;
pub mod export;
pub mod gateway;
pub mod logbook;
pub mod message;
pub mod server;
pub mod store;

pub use config::{Config, ConfigError};
pub use export::{ExportEngine, ExportState, SaveReport, SaveStatus, EXPORT_FILENAME};
pub use logbook::{LogEntry, LogLevel, Logbook};
pub use message::LabMessage;
pub use server::{AbuseTracker, LabServer, ServerError};
pub use store::MessageStore;
