//! # Transport Configuration
//!
//! Caller-supplied tuning shared by both ends of a transfer. `max_packet_size`
//! must match on sender and receiver; everything else is local.
//!
//! Configuration arrives as a [`TransportConfigInput`] (every field optional,
//! durations in milliseconds, TOML-friendly) and is resolved into a validated
//! [`TransportConfig`].
//!
//! ```toml
//! max_packet_size = 1400
//! window_size = 16
//! buffer_capacity_bytes = 22400
//! rtt_sample_count = 4
//! bootstrap_timeout_ms = 200
//! default_timeout_ms = 500
//! max_retransmissions = 50
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::wire::{DEFAULT_MAX_PACKET_SIZE, MAX_DATAGRAM_PAYLOAD};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ─── Input (deserialized) ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransportConfigInput {
    pub max_packet_size: Option<usize>,
    pub window_size: Option<usize>,
    pub buffer_capacity_bytes: Option<usize>,
    pub rtt_sample_count: Option<usize>,
    pub bootstrap_timeout_ms: Option<u64>,
    pub default_timeout_ms: Option<u64>,
    pub min_timeout_ms: Option<u64>,
    pub max_timeout_ms: Option<u64>,
    pub max_retransmissions: Option<u32>,
    pub idle_timeout_ms: Option<u64>,
}

impl TransportConfigInput {
    /// Fill defaults and validate.
    ///
    /// When only `window_size` or `max_packet_size` is given, the buffer
    /// capacity defaults to one full window so reordering never forces drops.
    pub fn resolve(self) -> Result<TransportConfig, ConfigError> {
        let defaults = TransportConfig::default();
        let max_packet_size = self.max_packet_size.unwrap_or(defaults.max_packet_size);
        let window_size = self.window_size.unwrap_or(defaults.window_size);
        let buffer_capacity_bytes = self
            .buffer_capacity_bytes
            .unwrap_or_else(|| window_size.saturating_mul(max_packet_size));

        let config = TransportConfig {
            max_packet_size,
            window_size,
            buffer_capacity_bytes,
            rtt_sample_count: self.rtt_sample_count.unwrap_or(defaults.rtt_sample_count),
            bootstrap_timeout: self
                .bootstrap_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.bootstrap_timeout),
            default_timeout: self
                .default_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_timeout),
            min_timeout: self
                .min_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_timeout),
            max_timeout: self
                .max_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_timeout),
            max_retransmissions: self.max_retransmissions,
            idle_timeout: self.idle_timeout_ms.map(Duration::from_millis),
        };
        config.validate()?;
        Ok(config)
    }
}

// ─── Runtime config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Payload bytes per packet (chunking granularity).
    pub max_packet_size: usize,
    /// Maximum unacknowledged packets in flight.
    pub window_size: usize,
    /// Receiver reordering headroom in payload bytes.
    pub buffer_capacity_bytes: usize,
    /// Packets sent one at a time to sample RTT before the windowed phase.
    /// Zero disables sampling and uses `default_timeout`.
    pub rtt_sample_count: usize,
    /// How long each bootstrap sample waits for its ACK.
    pub bootstrap_timeout: Duration,
    /// Fallback retransmission timeout when no RTT sample succeeds.
    pub default_timeout: Duration,
    /// Lower clamp on the derived retransmission timeout.
    pub min_timeout: Duration,
    /// Upper clamp on the derived retransmission timeout.
    pub max_timeout: Duration,
    /// Retransmissions allowed per packet before giving up. `None` retries forever.
    pub max_retransmissions: Option<u32>,
    /// Receiver gives up after this long without any datagram. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            window_size: 16,
            buffer_capacity_bytes: 16 * DEFAULT_MAX_PACKET_SIZE,
            rtt_sample_count: 4,
            bootstrap_timeout: Duration::from_millis(200),
            default_timeout: Duration::from_millis(500),
            min_timeout: Duration::from_millis(10),
            max_timeout: Duration::from_secs(60),
            max_retransmissions: None,
            idle_timeout: None,
        }
    }
}

impl TransportConfig {
    /// Parse and resolve a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let input: TransportConfigInput = toml::from_str(s)?;
        input.resolve()
    }

    /// Read, parse and resolve a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_packet_size == 0 || self.max_packet_size > MAX_DATAGRAM_PAYLOAD {
            return Err(ConfigError::Invalid(format!(
                "max_packet_size must be in 1..={MAX_DATAGRAM_PAYLOAD}, got {}",
                self.max_packet_size
            )));
        }
        if self.window_size == 0 {
            return Err(ConfigError::Invalid("window_size must be at least 1".into()));
        }
        if self.buffer_capacity_bytes < self.max_packet_size {
            return Err(ConfigError::Invalid(format!(
                "buffer_capacity_bytes ({}) must hold at least one packet ({})",
                self.buffer_capacity_bytes, self.max_packet_size
            )));
        }
        if self.bootstrap_timeout.is_zero()
            || self.default_timeout.is_zero()
            || self.min_timeout.is_zero()
        {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.min_timeout > self.max_timeout {
            return Err(ConfigError::Invalid(format!(
                "min_timeout ({:?}) exceeds max_timeout ({:?})",
                self.min_timeout, self.max_timeout
            )));
        }
        let full_window = self.window_size.saturating_mul(self.max_packet_size);
        if self.buffer_capacity_bytes < full_window {
            tracing::warn!(
                buffer_capacity_bytes = self.buffer_capacity_bytes,
                full_window,
                "receive buffer smaller than one full window; out-of-order packets may be dropped"
            );
        }
        Ok(())
    }

    /// Largest datagram either side expects to read.
    pub fn max_datagram_len(&self) -> usize {
        crate::wire::HEADER_LEN + self.max_packet_size
    }
}
