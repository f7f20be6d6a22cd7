// SPDX-License-Identifier: MIT OR Apache-2.0
//! Server configuration types.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, ServerError};

// Environment variable names for configuration.

/// Bind address environment variable.
pub const ENV_BIND_ADDR: &str = "PUBSUBSQL_BIND_ADDR";
/// Channel buffer size environment variable.
pub const ENV_CHANNEL_BUFFER_SIZE: &str = "PUBSUBSQL_CHANNEL_BUFFER_SIZE";
/// Select batch size environment variable.
pub const ENV_SELECT_BATCH_SIZE: &str = "PUBSUBSQL_SELECT_BATCH_SIZE";
/// Maximum message size environment variable.
pub const ENV_MAX_MESSAGE_SIZE: &str = "PUBSUBSQL_MAX_MESSAGE_SIZE";
/// Shutdown drain timeout seconds environment variable.
pub const ENV_DRAIN_TIMEOUT_SECS: &str = "PUBSUBSQL_DRAIN_TIMEOUT_SECS";

/// Environment variable parsing helpers.
mod env_parse {
    use std::net::SocketAddr;
    use std::time::Duration;

    use super::{Result, ServerError};

    /// Parse a socket address from an environment variable.
    pub fn parse_socket_addr(key: &str) -> Option<Result<SocketAddr>> {
        std::env::var(key).ok().map(|val| {
            val.parse()
                .map_err(|e| ServerError::Config(format!("invalid {key}: {e}")))
        })
    }

    /// Parse a usize from an environment variable.
    pub fn parse_usize(key: &str) -> Option<Result<usize>> {
        std::env::var(key).ok().map(|val| {
            val.parse()
                .map_err(|e| ServerError::Config(format!("invalid {key}: {e}")))
        })
    }

    /// Parse a duration in seconds from an environment variable.
    pub fn parse_duration_secs(key: &str) -> Option<Result<Duration>> {
        std::env::var(key).ok().map(|val| {
            val.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| ServerError::Config(format!("invalid {key}: {e}")))
        })
    }
}

/// Server configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listener to.
    pub bind_addr: SocketAddr,
    /// Capacity of every bounded channel: dispatcher inbox, table inboxes,
    /// and per-connection outbound queues.
    pub channel_buffer_size: usize,
    /// Rows per SELECT result frame.
    pub select_batch_size: usize,
    /// Maximum wire frame payload size in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for workers to drain.
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7777".parse().unwrap_or_else(|_| {
                SocketAddr::from(([127, 0, 0, 1], 7777))
            }),
            channel_buffer_size: 2048,
            select_batch_size: 1000,
            max_message_size: 1024 * 1024,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the channel buffer size.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero; bounded channels need capacity.
    #[must_use]
    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        assert!(size > 0, "channel_buffer_size must be positive");
        self.channel_buffer_size = size;
        self
    }

    /// Set the select batch size.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero; SELECT results are chunked by this value.
    #[must_use]
    pub fn with_select_batch_size(mut self, size: usize) -> Self {
        assert!(size > 0, "select_batch_size must be positive");
        self.select_batch_size = size;
        self
    }

    /// Set the maximum message size.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the shutdown drain timeout.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = env_parse::parse_socket_addr(ENV_BIND_ADDR) {
            config.bind_addr = addr?;
        }
        if let Some(size) = env_parse::parse_usize(ENV_CHANNEL_BUFFER_SIZE) {
            config.channel_buffer_size = size?;
        }
        if let Some(size) = env_parse::parse_usize(ENV_SELECT_BATCH_SIZE) {
            config.select_batch_size = size?;
        }
        if let Some(size) = env_parse::parse_usize(ENV_MAX_MESSAGE_SIZE) {
            config.max_message_size = size?;
        }
        if let Some(timeout) = env_parse::parse_duration_secs(ENV_DRAIN_TIMEOUT_SECS) {
            config.drain_timeout = timeout?;
        }

        if config.channel_buffer_size == 0 {
            return Err(ServerError::Config(format!(
                "{ENV_CHANNEL_BUFFER_SIZE} must be positive"
            )));
        }
        if config.select_batch_size == 0 {
            return Err(ServerError::Config(format!(
                "{ENV_SELECT_BATCH_SIZE} must be positive"
            )));
        }

        Ok(config)
    }

    /// Rejects values no worker task can run with. The builder setters
    /// panic on these; this catches configs assembled field by field.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.channel_buffer_size == 0 {
            return Err(ServerError::Config(
                "channel_buffer_size must be positive".to_string(),
            ));
        }
        if self.select_batch_size == 0 {
            return Err(ServerError::Config(
                "select_batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 7777);
        assert_eq!(config.channel_buffer_size, 2048);
        assert_eq!(config.select_batch_size, 1000);
        assert_eq!(config.max_message_size, 1024 * 1024);
        assert_eq!(config.drain_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new()
            .with_bind_addr("0.0.0.0:9000".parse().unwrap())
            .with_channel_buffer_size(64)
            .with_select_batch_size(10)
            .with_max_message_size(4096)
            .with_drain_timeout(Duration::from_secs(1));

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.channel_buffer_size, 64);
        assert_eq!(config.select_batch_size, 10);
        assert_eq!(config.max_message_size, 4096);
        assert_eq!(config.drain_timeout, Duration::from_secs(1));
    }

    #[test]
    #[should_panic(expected = "select_batch_size must be positive")]
    fn test_zero_select_batch_size_panics() {
        let _ = ServerConfig::new().with_select_batch_size(0);
    }

    #[test]
    #[should_panic(expected = "channel_buffer_size must be positive")]
    fn test_zero_channel_buffer_size_panics() {
        let _ = ServerConfig::new().with_channel_buffer_size(0);
    }

    #[test]
    fn test_validate_rejects_zero_fields() {
        let mut config = ServerConfig::new();
        config.select_batch_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("select_batch_size"));

        let mut config = ServerConfig::new();
        config.channel_buffer_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("channel_buffer_size"));
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(ServerConfig::default().validate().is_ok());
    }
}
