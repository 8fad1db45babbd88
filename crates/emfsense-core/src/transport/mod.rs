//! Device transport layer
//!
//! Owns the USB-serial link and the byte-level command protocol:
//! - Frame encoding and decoding ([`protocol`])
//! - Bridge-chip identification and configuration recipes ([`chip`])
//! - Port discovery and the `serialport` adapter ([`link`])
//! - In-process device emulator ([`simulator`])
//! - Session state and request/response exchange ([`session`])
//! - Continuous acquisition thread ([`poller`])
//!
//! This layer never interprets the physical meaning of a payload; it hands
//! decoded [`RawSample`](crate::signal::RawSample)s to subscribers.

pub mod chip;
pub mod link;
pub mod poller;
pub mod protocol;
pub mod session;
pub mod simulator;

use protocol::Command;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use chip::{ChipFamily, ConfigStep, LineSettings, Parity};
pub use link::{PortCandidate, SerialLink, SerialPortLink, UsbDeviceInfo};
pub use protocol::{DeviceStatus, Response, ResponseStatus};
pub use session::{DeviceSession, Transport};
pub use simulator::{SimulatedInstrument, SimulatorControl};

/// Errors that can occur while talking to the instrument
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No compatible EMF device found")]
    NoCompatibleDevice,

    #[error("No response to {command:?} within {timeout_ms} ms")]
    NoResponse { command: Command, timeout_ms: u64 },

    #[error("Malformed response to {command:?}: {reason}")]
    MalformedResponse { command: Command, reason: String },

    #[error("Link closed")]
    LinkClosed,

    #[error("Device rejected {command:?} (code {code:#04x})")]
    DeviceRejected { command: Command, code: u8 },

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid frequency index {0} (expected 0-6)")]
    InvalidFrequencyIndex(usize),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True when the link can no longer be used and must be reopened
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::LinkClosed | TransportError::NotConnected)
    }
}

fn default_family_tokens() -> Vec<String> {
    vec!["EMF".to_string()]
}

fn default_baud_rate() -> u32 {
    crate::DEFAULT_BAUD_RATE
}

fn default_command_timeout_ms() -> u64 {
    1000
}

fn default_poll_timeout_ms() -> u64 {
    250
}

fn default_poll_interval_ms() -> u64 {
    1000 / u64::from(crate::POLL_RATE_HZ)
}

fn default_stream_capacity() -> usize {
    64
}

/// Link and acquisition tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Substrings matched (case-insensitively) against USB product and
    /// manufacturer names during discovery
    #[serde(default = "default_family_tokens")]
    pub family_tokens: Vec<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout for control commands
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Read timeout for POLL_DATA
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Poll cadence (100 ms = 10 Hz)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Samples buffered per subscriber before the oldest are dropped
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,
}

impl TransportConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Line settings every chip recipe configures
    pub fn line_settings(&self) -> LineSettings {
        LineSettings {
            baud_rate: self.baud_rate,
            ..LineSettings::default()
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            family_tokens: default_family_tokens(),
            baud_rate: default_baud_rate(),
            command_timeout_ms: default_command_timeout_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            stream_capacity: default_stream_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.command_timeout(), Duration::from_millis(1000));
        assert!(config.poll_timeout() < config.command_timeout());
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_config() {
        let config: TransportConfig =
            serde_json::from_str(r#"{"family_tokens": ["GEO", "EMF"]}"#).unwrap();
        assert_eq!(config.family_tokens, vec!["GEO", "EMF"]);
        assert_eq!(config.poll_interval_ms, 100);
    }

    #[test]
    fn test_fatal_errors() {
        assert!(TransportError::LinkClosed.is_fatal());
        assert!(!TransportError::NoResponse {
            command: Command::PollData,
            timeout_ms: 250
        }
        .is_fatal());
    }
}
