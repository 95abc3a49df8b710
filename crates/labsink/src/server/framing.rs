// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! STX/ETX frame extraction from an accumulating receive buffer.

/// Start-of-text marker.
pub const STX: char = '\u{02}';

/// End-of-text marker.
pub const ETX: char = '\u{03}';

/// Outcome of one extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete payload was extracted and consumed from the buffer.
    Complete(String),
    /// An end marker arrived without a preceding start marker; the whole
    /// buffer has been discarded.
    Malformed,
    /// No end marker yet; wait for more bytes.
    Incomplete,
}

/// Extract the next frame from `buffer`.
///
/// Callers loop on this until it returns [`Frame::Incomplete`] (more frames
/// may have arrived in one read) or [`Frame::Malformed`] (stop processing the
/// current buffer). The payload is the text strictly between the first STX
/// and the first ETX; everything up to and including the ETX is consumed.
pub fn next_frame(buffer: &mut String) -> Frame {
    let Some(etx) = buffer.find(ETX) else {
        return Frame::Incomplete;
    };

    match buffer.find(STX) {
        Some(stx) if stx < etx => {
            let payload = buffer[stx + 1..etx].to_string();
            buffer.drain(..=etx);
            Frame::Complete(payload)
        }
        // STX absent, or only at/after the ETX: the frame cannot be
        // recovered, so the pending bytes are dropped wholesale.
        _ => {
            buffer.clear();
            Frame::Malformed
        }
    }
}
