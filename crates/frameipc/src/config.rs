// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Messaging configuration.
//!
//! Supports both programmatic and file-based configuration:
//!
//! ```toml
//! default_timeout_ms = 10000
//! default_retry = 1
//! fail_fast_unroutable = false
//! log_traffic = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Prefix of ack tokens minted by the host side.
pub const HOST_ACK_PREFIX: &str = "ack_r2p_";
/// Prefix of ack tokens minted by a guest endpoint.
pub const GUEST_ACK_PREFIX: &str = "ack_p2r_";

/// Per-transport messaging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Reply budget of a single attempt (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Reissues after a timeout when the caller does not say otherwise.
    #[serde(default)]
    pub default_retry: u32,

    /// Reject sends to addresses without a route instead of letting them time out.
    #[serde(default)]
    pub fail_fast_unroutable: bool,

    /// Log every send/receive/reply at debug level.
    #[serde(default = "default_true")]
    pub log_traffic: bool,

    /// Prefix of minted ack tokens.
    #[serde(default = "default_ack_prefix")]
    pub ack_prefix: String,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_ack_prefix() -> String {
    HOST_ACK_PREFIX.to_string()
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            default_retry: 0,
            fail_fast_unroutable: false,
            log_traffic: true,
            ack_prefix: default_ack_prefix(),
        }
    }
}

impl IpcConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("default_timeout_ms must be > 0".into()));
        }
        if self.ack_prefix.is_empty() {
            return Err(ConfigError::Invalid("ack_prefix must not be empty".into()));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Set the default per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the default retry count.
    pub fn retry(mut self, retry: u32) -> Self {
        self.default_retry = retry;
        self
    }

    /// Fail fast on unroutable addresses.
    pub fn fail_fast_unroutable(mut self, enabled: bool) -> Self {
        self.fail_fast_unroutable = enabled;
        self
    }

    /// Toggle per-message traffic logging.
    pub fn log_traffic(mut self, enabled: bool) -> Self {
        self.log_traffic = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = IpcConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_secs(10));
        assert_eq!(config.default_retry, 0);
        assert!(!config.fail_fast_unroutable);
        assert_eq!(config.ack_prefix, "ack_r2p_");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = IpcConfig::from_toml("default_retry = 2\nlog_traffic = false\n").unwrap();
        assert_eq!(config.default_retry, 2);
        assert!(!config.log_traffic);
        assert_eq!(config.default_timeout_ms, 10_000);
    }

    #[test]
    fn test_validation() {
        assert!(IpcConfig::from_toml("default_timeout_ms = 0").is_err());
        assert!(IpcConfig::from_toml("ack_prefix = \"\"").is_err());
        assert!(matches!(
            IpcConfig::from_toml("default_retry = \"many\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = IpcConfig::default()
            .timeout(Duration::from_millis(250))
            .retry(3)
            .fail_fast_unroutable(true);
        assert_eq!(config.default_timeout_ms, 250);
        assert_eq!(config.default_retry, 3);
        assert!(config.fail_fast_unroutable);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "default_timeout_ms = 1500").unwrap();
        writeln!(file, "fail_fast_unroutable = true").unwrap();

        let config = IpcConfig::from_file(file.path()).unwrap();
        assert_eq!(config.default_timeout(), Duration::from_millis(1500));
        assert!(config.fail_fast_unroutable);
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = toml::to_string_pretty(&IpcConfig::default()).expect("serialize");
        assert!(toml_str.contains("default_timeout_ms = 10000"));
        assert!(toml_str.contains("ack_prefix = \"ack_r2p_\""));
    }
}
