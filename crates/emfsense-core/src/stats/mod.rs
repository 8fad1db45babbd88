//! Statistics collection and storage

pub mod store;

pub use store::{DepthPoint, LinkLossEvent, ReadingStats, RunningStats};
