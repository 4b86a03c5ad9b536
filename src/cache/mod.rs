//! Alarm media cache
//!
//! Snapshot and stitch media for each camera, rendered from alarm image
//! URLs and served to live sessions.

pub mod error;
pub mod generation;
pub mod render;
pub mod store;

pub use error::CacheError;
pub use generation::{StitchArtifact, StitchMedia};
pub use render::{MediaRenderer, ProcessorRenderer};
pub use store::{AlarmMediaCache, SnapshotRequest};
