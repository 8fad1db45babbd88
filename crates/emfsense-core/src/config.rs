//! Persistent instrument configuration
//!
//! Transport, signal and calibration tunables in one JSON file at
//! `<data_dir>/emfsense/config.json`. Missing fields take their defaults.

use crate::calibration::CalibrationConfig;
use crate::signal::SignalConfig;
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_frequency_index() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    /// Carrier selected when measurement starts without an explicit index
    #[serde(default = "default_frequency_index")]
    pub frequency_index: usize,
    /// Remembered port name (None = discover)
    #[serde(default)]
    pub port: Option<String>,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            signal: SignalConfig::default(),
            calibration: CalibrationConfig::default(),
            frequency_index: default_frequency_index(),
            port: None,
        }
    }
}

impl InstrumentConfig {
    /// Config file path: `<data_dir>/emfsense/config.json`
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("emfsense")
            .join("config.json")
    }

    /// Load config from `path`, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to parse config, using defaults"
                    );
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InstrumentConfig::default();
        assert_eq!(config.frequency_index, 3);
        assert_eq!(config.port, None);
        assert_eq!(config.transport.baud_rate, crate::DEFAULT_BAUD_RATE);
        assert!(InstrumentConfig::default_path().ends_with("emfsense/config.json"));
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: InstrumentConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, InstrumentConfig::default());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"port": "/dev/ttyUSB0", "transport": {"poll_interval_ms": 200}}"#;
        let config: InstrumentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.transport.poll_interval_ms, 200);
        assert_eq!(config.transport.command_timeout_ms, 1000);
        assert_eq!(config.calibration, CalibrationConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = InstrumentConfig {
            frequency_index: 5,
            port: Some("COM7".to_string()),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = InstrumentConfig::load(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(InstrumentConfig::load(&path), InstrumentConfig::default());
        assert_eq!(
            InstrumentConfig::load(&dir.path().join("missing.json")),
            InstrumentConfig::default()
        );
    }
}
