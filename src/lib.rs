//! Emfsense - companion core for electromagnetic ground-probing instruments
//!
//! This library re-exports the device transport, depth engine, calibration
//! and file codec functionality from `emfsense-core`.

pub use emfsense_core::calibration;
pub use emfsense_core::codec;
pub use emfsense_core::config;
pub use emfsense_core::instrument;
pub use emfsense_core::signal;
pub use emfsense_core::stats;
pub use emfsense_core::transport;

pub use emfsense_core::{
    CalibratedReading, CalibrationKind, CalibrationStore, FileFormat, Instrument,
    InstrumentConfig, InstrumentError, ParsedFile, Plane, Point3, RawSample, Reading,
    ReadingStats, SignalEngine, Transport, TransportError,
};
pub use emfsense_core::{BUILD_DATE, DEFAULT_BAUD_RATE, POLL_RATE_HZ, VERSION};
