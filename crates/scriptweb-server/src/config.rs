// Copyright 2025 Scriptweb Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bridge configuration.
//!
//! Capacities and timeouts shared by the codec and the server plumbing.
//! Values can come from a JSON file (see [`BridgeConfig::from_json_file`])
//! and be overridden with the builder methods.

use std::path::Path;
use std::time::Duration;

use scriptweb_common::{BridgeError, Result, MAX_HEADER_FIELD_LEN};
use serde::Deserialize;

/// Limits applied to everything that crosses the interpreter boundary.
///
/// # Example
///
/// ```
/// use scriptweb_server::BridgeConfig;
/// use std::time::Duration;
///
/// let config = BridgeConfig::new()
///     .with_request_header_capacity(20)
///     .with_shutdown_grace(Duration::from_secs(1));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Request headers stored per request; extra headers are dropped.
    pub request_header_capacity: usize,
    /// Response headers stored per response; extra headers are dropped.
    pub response_header_capacity: usize,
    /// Longest header name or value kept, in bytes.
    pub max_header_field_len: usize,
    /// Time allowed to read a request head.
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,
    /// Time allowed for open connections to drain when a server stops.
    #[serde(with = "duration_secs")]
    pub shutdown_grace: Duration,
    /// Largest request body handed to a callable.
    pub max_body_bytes: usize,
    /// Outbound messages queued per WebSocket client. A client whose queue
    /// is full is disconnected.
    pub websocket_queue_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_header_capacity: 50,
            response_header_capacity: 10,
            max_header_field_len: MAX_HEADER_FIELD_LEN,
            read_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
            max_body_bytes: 10 * 1024 * 1024,
            websocket_queue_capacity: 64,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a config from a JSON file. Missing keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: BridgeConfig = serde_json::from_str(&raw)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_request_header_capacity(mut self, capacity: usize) -> Self {
        self.request_header_capacity = capacity;
        self
    }

    pub fn with_response_header_capacity(mut self, capacity: usize) -> Self {
        self.response_header_capacity = capacity;
        self
    }

    pub fn with_max_header_field_len(mut self, len: usize) -> Self {
        self.max_header_field_len = len;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    pub fn with_websocket_queue_capacity(mut self, capacity: usize) -> Self {
        self.websocket_queue_capacity = capacity;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if any capacity, length or timeout is
    /// zero.
    pub fn validate(&self) -> Result<()> {
        if self.request_header_capacity == 0 {
            return Err(BridgeError::Config(
                "request header capacity must be greater than zero".to_string(),
            ));
        }
        if self.response_header_capacity == 0 {
            return Err(BridgeError::Config(
                "response header capacity must be greater than zero".to_string(),
            ));
        }
        if self.max_header_field_len == 0 {
            return Err(BridgeError::Config(
                "header field length must be greater than zero".to_string(),
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(BridgeError::Config(
                "read timeout must be greater than zero".to_string(),
            ));
        }
        if self.shutdown_grace.is_zero() {
            return Err(BridgeError::Config(
                "shutdown grace must be greater than zero".to_string(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(BridgeError::Config(
                "max body size must be greater than zero".to_string(),
            ));
        }
        if self.websocket_queue_capacity == 0 {
            return Err(BridgeError::Config(
                "websocket queue capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.request_header_capacity, 50);
        assert_eq!(config.response_header_capacity, 10);
        assert_eq!(config.max_header_field_len, 255);
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.websocket_queue_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chaining() {
        let config = BridgeConfig::new()
            .with_request_header_capacity(8)
            .with_response_header_capacity(4)
            .with_read_timeout(Duration::from_millis(1500));

        assert_eq!(config.request_header_capacity, 8);
        assert_eq!(config.response_header_capacity, 4);
        assert_eq!(config.read_timeout.as_millis(), 1500);
    }

    #[test]
    fn test_validate_zero_capacity_fails() {
        let config = BridgeConfig::new().with_request_header_capacity(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("greater than zero"));

        let config = BridgeConfig::new().with_response_header_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_websocket_queue_fails() {
        let config = BridgeConfig::new().with_websocket_queue_capacity(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("websocket queue capacity"));
    }

    #[test]
    fn test_validate_zero_timeout_fails() {
        let config = BridgeConfig::new().with_shutdown_grace(Duration::ZERO);
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_from_json_file_keeps_defaults_for_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"request_header_capacity": 12, "read_timeout": 2.5}}"#).unwrap();

        let config = BridgeConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.request_header_capacity, 12);
        assert_eq!(config.read_timeout, Duration::from_millis(2500));
        assert_eq!(config.response_header_capacity, 10);
    }

    #[test]
    fn test_from_json_file_rejects_unknown_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"pool_size": 4}}"#).unwrap();

        let err = BridgeConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_from_json_file_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"response_header_capacity": 0}}"#).unwrap();

        assert!(BridgeConfig::from_json_file(file.path()).is_err());
    }
}
