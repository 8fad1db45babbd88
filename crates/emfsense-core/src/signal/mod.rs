//! Signal and depth processing
//!
//! Pure, deterministic conversion of raw I/Q samples into readings:
//! - Raw and derived reading types ([`sample`])
//! - Frequency constant table and logarithmic depth model ([`depth`])
//! - Confidence and quality scoring ([`quality`])
//! - Per-frequency moving windows ([`smoothing`])
//! - Coarse material classification ([`material`])
//! - The engine tying them together ([`engine`])

pub mod depth;
pub mod engine;
pub mod material;
pub mod quality;
pub mod sample;
pub mod smoothing;

pub use depth::{DepthModel, CALIBRATION_TABLE, CARRIER_FREQUENCIES};
pub use engine::{SignalConfig, SignalEngine};
pub use material::{Bounds, MaterialClassifier, MaterialRule};
pub use sample::{GeoPosition, MaterialClass, RawSample, Reading};
