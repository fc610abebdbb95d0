pub mod aggregator;
pub mod config;
pub mod pairing;
pub mod sample;
pub mod stats;

pub use aggregator::{AggregationReport, Aggregator};
pub use config::AggregationConfig;
pub use sample::CalibrationSample;
