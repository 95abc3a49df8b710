// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Removable volume resolution.
//!
//! Walks the kernel's mount table and sysfs to find a ready removable
//! medium: `/proc/mounts` gives device-to-mount-point pairs, and
//! `/sys/block/<dev>/removable` says whether the backing device is
//! removable.

use std::path::{Path, PathBuf};
use tracing::warn;

/// One `/proc/mounts` entry we care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
}

/// Resolve the target volume for an export.
///
/// Prefers the configured mount point when it is a ready removable mount;
/// otherwise scans all mounts for the first ready removable one.
pub fn resolve(configured: Option<&Path>) -> Option<PathBuf> {
    let mounts = match std::fs::read_to_string("/proc/mounts") {
        Ok(content) => parse_mounts(&content),
        Err(e) => {
            warn!("Cannot read mount table: {}", e);
            return None;
        }
    };

    if let Some(path) = configured {
        match mounts.iter().find(|m| m.mount_point == path) {
            Some(entry) if entry_usable(entry) => return Some(entry.mount_point.clone()),
            _ => warn!("Configured USB path {:?} is invalid or not ready", path),
        }
    }

    mounts
        .into_iter()
        .find(|m| entry_usable(m))
        .map(|m| m.mount_point)
}

fn entry_usable(entry: &MountEntry) -> bool {
    device_removable(&entry.device) && entry.mount_point.is_dir()
}

/// Parse `/proc/mounts` content into block-device entries.
///
/// Only `/dev/...` devices are kept; virtual filesystems (proc, tmpfs,
/// overlay) can never be removable media.
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            if !device.starts_with("/dev/") {
                return None;
            }
            Some(MountEntry {
                device: device.to_string(),
                mount_point: PathBuf::from(unescape_mount_path(mount_point)),
            })
        })
        .collect()
}

/// Undo the octal escapes the kernel applies to mount paths.
///
/// Escapes are decoded at the byte level; consecutive escapes form the
/// multi-byte UTF-8 sequences of non-ASCII path components.
fn unescape_mount_path(raw: &str) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.bytes();

    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let digits: Vec<u8> = bytes.by_ref().take(3).collect();
        match std::str::from_utf8(&digits)
            .ok()
            .and_then(|d| u8::from_str_radix(d, 8).ok())
        {
            Some(byte) => out.push(byte),
            None => {
                out.push(b'\\');
                out.extend_from_slice(&digits);
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Strip a partition suffix: `sdb1` -> `sdb`, `mmcblk0p1` -> `mmcblk0`.
fn strip_partition(name: &str) -> &str {
    let trimmed = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if trimmed.len() < name.len() {
        trimmed.strip_suffix('p').unwrap_or(trimmed)
    } else {
        name
    }
}

fn device_removable(device: &str) -> bool {
    let Some(name) = device.strip_prefix("/dev/") else {
        return false;
    };

    // Whole-device mounts (sr0, sdb) appear in /sys/block under their own
    // name; partitions under the parent device's.
    for base in [name, strip_partition(name)] {
        let flag_path = format!("/sys/block/{}/removable", base);
        if let Ok(flag) = std::fs::read_to_string(flag_path) {
            return flag.trim() == "1";
        }
    }
    false
}
