// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lab message record and the domain grammar it is validated against.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Test names accepted on the wire.
pub const VALID_TESTS: &[&str] = &["GLUCOSE", "HEMOGLOBIN", "CHOLESTEROL"];

/// Measurement units accepted on the wire.
pub const VALID_UNITS: &[&str] = &["mg/dL", "g/dL", "mmol/L"];

/// One validated instrument reading.
///
/// A `LabMessage` only ever exists after its payload has passed the security
/// filter and the grammar check; the store never holds partial data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabMessage {
    /// Patient identifier (`PATIENT` + three digits).
    pub patient_id: String,

    /// Test name (one of [`VALID_TESTS`]).
    pub test_name: String,

    /// Numeric reading, `0 < value <= 1000`.
    pub value: f64,

    /// Measurement unit (one of [`VALID_UNITS`]).
    pub unit: String,

    /// Capture timestamp, assigned at acceptance rather than by the client.
    pub timestamp: DateTime<Utc>,
}

fn patient_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^PATIENT\d{3}$").expect("valid regex"))
}

impl LabMessage {
    /// Validate a decoded payload against the grammar and build the record.
    ///
    /// The payload must split into exactly four pipe-separated fields:
    /// patient id, test name, numeric value, unit. Any violation yields
    /// `None`; the wire protocol does not report finer-grained errors.
    pub fn parse(payload: &str) -> Option<Self> {
        let parts: Vec<&str> = payload.split('|').collect();
        if parts.len() != 4 {
            return None;
        }

        if !patient_id_pattern().is_match(parts[0]) {
            return None;
        }

        if !VALID_TESTS.contains(&parts[1]) {
            return None;
        }

        let value: f64 = parts[2].parse().ok()?;
        if !value.is_finite() || value <= 0.0 || value > 1000.0 {
            return None;
        }

        if !VALID_UNITS.contains(&parts[3]) {
            return None;
        }

        Some(Self {
            patient_id: parts[0].to_string(),
            test_name: parts[1].to_string(),
            value,
            unit: parts[3].to_string(),
            timestamp: Utc::now(),
        })
    }
}
