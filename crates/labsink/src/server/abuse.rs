// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-source-address abuse tracking: rate limiting and permanent blocking.

use dashmap::{DashMap, DashSet};
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Per-address abuse record, created lazily on first contact.
#[derive(Debug, Default)]
struct ClientStats {
    /// Cumulative rejection count. Reset only administratively.
    error_count: u32,
    /// Last accepted rate-check time; `None` until the first check.
    last_seen: Option<Instant>,
}

/// Tracks misbehaving source addresses.
///
/// The two thresholds are deliberately asymmetric: the rate limiter fires on
/// rapid-fire traffic from one address, while [`register_error`] accumulates
/// across every rejection reason, so a client alternating attack types still
/// crosses the higher blocking bar eventually.
///
/// [`register_error`]: AbuseTracker::register_error
#[derive(Debug)]
pub struct AbuseTracker {
    stats: DashMap<IpAddr, ClientStats>,
    blocked: DashSet<IpAddr>,
    rate_window: Duration,
    rate_threshold: u32,
    block_threshold: u32,
}

impl AbuseTracker {
    /// Create a tracker with the given rate window and thresholds.
    pub fn new(rate_window: Duration, rate_threshold: u32, block_threshold: u32) -> Self {
        Self {
            stats: DashMap::new(),
            blocked: DashSet::new(),
            rate_window,
            rate_threshold,
            block_threshold,
        }
    }

    /// Check inter-message spacing for `addr`.
    ///
    /// Messages arriving faster than the rate window bump the error count and
    /// return `true` (exceeded) once the count passes the rate threshold;
    /// otherwise the last-seen time is refreshed and `false` is returned.
    pub fn check_rate_limit(&self, addr: IpAddr) -> bool {
        let mut stats = self.stats.entry(addr).or_default();

        match stats.last_seen {
            Some(seen) if seen.elapsed() < self.rate_window => {
                stats.error_count += 1;
                stats.error_count > self.rate_threshold
            }
            _ => {
                stats.last_seen = Some(Instant::now());
                false
            }
        }
    }

    /// Record one rejection for `addr` regardless of reason.
    ///
    /// Returns `true` when this call pushed the address onto the block list.
    /// Blocking is sticky: once added there is no automatic removal.
    pub fn register_error(&self, addr: IpAddr) -> bool {
        let count = {
            let mut stats = self.stats.entry(addr).or_default();
            stats.error_count += 1;
            stats.error_count
        };

        count > self.block_threshold && self.blocked.insert(addr)
    }

    /// True when `addr` is on the permanent block list.
    pub fn is_blocked(&self, addr: IpAddr) -> bool {
        self.blocked.contains(&addr)
    }

    /// Administrative reset of an address's error count.
    ///
    /// Returns `false` when the address has never been seen. Does not lift an
    /// existing block.
    pub fn reset(&self, addr: IpAddr) -> bool {
        match self.stats.get_mut(&addr) {
            Some(mut stats) => {
                stats.error_count = 0;
                true
            }
            None => false,
        }
    }

    /// Current error count for an address (0 if never seen).
    pub fn error_count(&self, addr: IpAddr) -> u32 {
        self.stats.get(&addr).map(|s| s.error_count).unwrap_or(0)
    }
}
