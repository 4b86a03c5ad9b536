//! Latency banding and engine counters

pub mod metrics;

pub use metrics::{EngineStats, LatencyBand, LatencyBands};
