// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service configuration.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// labsink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port the instrument protocol listens on (default: 12377)
    #[serde(default = "default_port")]
    pub port: u16,

    /// HTTP port for the status surface (default: 8080)
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Explicit removable-volume mount point. When absent or not a ready
    /// removable mount, auto-detection is used instead.
    #[serde(default)]
    pub usb_path: Option<PathBuf>,

    /// Per-connection socket read/write timeout in seconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,

    /// Inactivity window after which pending records are flushed (seconds)
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,

    /// Export polling interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minimum spacing between messages from one address (milliseconds)
    #[serde(default = "default_rate_window")]
    pub rate_window_ms: u64,

    /// Error count above which rapid-fire traffic is rate limited
    #[serde(default = "default_rate_threshold")]
    pub rate_limit_threshold: u32,

    /// Cumulative error count above which an address is blocked permanently
    #[serde(default = "default_block_threshold")]
    pub block_threshold: u32,

    /// Export write attempts before giving up
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    /// Delay between export write attempts (seconds)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// File the logbook appends entries to
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

fn default_bind_address() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    12377
}

fn default_http_port() -> u16 {
    8080
}

fn default_io_timeout() -> u64 {
    5
}

fn default_idle_threshold() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    10
}

fn default_rate_window() -> u64 {
    100
}

fn default_rate_threshold() -> u32 {
    5
}

fn default_block_threshold() -> u32 {
    10
}

fn default_write_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs/labsink.log")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            http_port: default_http_port(),
            usb_path: None,
            io_timeout_secs: default_io_timeout(),
            idle_threshold_secs: default_idle_threshold(),
            poll_interval_secs: default_poll_interval(),
            rate_window_ms: default_rate_window(),
            rate_limit_threshold: default_rate_threshold(),
            block_threshold: default_block_threshold(),
            write_retries: default_write_retries(),
            retry_delay_secs: default_retry_delay(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Get the socket I/O timeout as a Duration.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    /// Get the idle threshold as a Duration.
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    /// Get the export polling interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Get the rate-limit spacing window as a Duration.
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    /// Get the export retry backoff as a Duration.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if self.http_port == 0 {
            return Err(ConfigError::InvalidValue("http_port cannot be 0".into()));
        }
        if self.idle_threshold_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "idle_threshold_secs cannot be 0".into(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "poll_interval_secs cannot be 0".into(),
            ));
        }
        if self.rate_window_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_window_ms cannot be 0".into(),
            ));
        }
        if self.write_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "write_retries cannot be 0".into(),
            ));
        }
        if self.block_threshold < self.rate_limit_threshold {
            return Err(ConfigError::InvalidValue(
                "block_threshold must be >= rate_limit_threshold".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("serialize error: {0}")]
    Serialize(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 12377);
        assert_eq!(config.idle_threshold_secs, 30);
        assert_eq!(config.write_retries, 3);
        assert!(config.usb_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config.port, parsed.port);
        assert_eq!(config.rate_window_ms, parsed.rate_window_ms);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed: Config = serde_json::from_str(r#"{"port": 9000}"#).unwrap();
        assert_eq!(parsed.port, 9000);
        assert_eq!(parsed.block_threshold, 10);
    }

    #[test]
    fn test_validation_port_zero() {
        let config = Config {
            port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_threshold_ordering() {
        let config = Config {
            rate_limit_threshold: 20,
            block_threshold: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_helpers() {
        let config = Config {
            idle_threshold_secs: 45,
            rate_window_ms: 250,
            ..Default::default()
        };
        assert_eq!(config.idle_threshold(), Duration::from_secs(45));
        assert_eq!(config.rate_window(), Duration::from_millis(250));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labsink.json");

        let config = Config {
            port: 14000,
            usb_path: Some(PathBuf::from("/mnt/usb")),
            ..Default::default()
        };
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.port, 14000);
        assert_eq!(loaded.usb_path.as_deref(), Some(Path::new("/mnt/usb")));
    }
}
