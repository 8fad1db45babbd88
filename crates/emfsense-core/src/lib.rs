//! Emfsense Core - Device link, depth engine, calibration and survey files
//!
//! This library drives a handheld electromagnetic ground-probing instrument
//! over a USB-serial link, turns its I/Q samples into depth estimates,
//! applies the calibration chain, and reads and writes the legacy survey
//! file formats.

pub mod calibration;
pub mod codec;
pub mod config;
pub mod instrument;
pub mod signal;
pub mod stats;
pub mod transport;

pub use calibration::{CalibratedReading, CalibrationKind, CalibrationStore};
pub use codec::{FileFormat, ParsedFile, Plane, Point3};
pub use config::InstrumentConfig;
pub use instrument::{Instrument, InstrumentError};
pub use signal::{RawSample, Reading, SignalEngine};
pub use stats::store::ReadingStats;
pub use transport::{Transport, TransportError};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Line speed of every supported bridge chip
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Acquisition rate of the poll loop (one POLL_DATA every 100 ms)
pub const POLL_RATE_HZ: u32 = 10;
