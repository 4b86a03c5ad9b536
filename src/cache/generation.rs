//! Stitch generation artifacts
//!
//! One generation of alarm media owns exactly one on-disk clip. Consumers
//! hold the artifact behind an `Arc`; the file is deleted when the last
//! reference is dropped, so a published path can never point at an
//! already-deleted file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One rendered stitch clip on disk
#[derive(Debug)]
pub struct StitchArtifact {
    path: PathBuf,
    alarm_id: String,
}

impl StitchArtifact {
    pub(crate) fn new(path: PathBuf, alarm_id: impl Into<String>) -> Self {
        Self {
            path,
            alarm_id: alarm_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn alarm_id(&self) -> &str {
        &self.alarm_id
    }
}

impl Drop for StitchArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(alarm_id = %self.alarm_id, path = %self.path.display(), "Deleted superseded stitch artifact")
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(alarm_id = %self.alarm_id, path = %self.path.display(), error = %e, "Failed to delete stitch artifact")
            }
        }
    }
}

/// The stitch media currently servable for a camera
#[derive(Debug, Clone)]
pub enum StitchMedia {
    /// A rendered generation; holding this keeps the file alive
    Generation(Arc<StitchArtifact>),
    /// The configured static placeholder (no alarm media ever produced)
    Placeholder(PathBuf),
}

impl StitchMedia {
    pub fn path(&self) -> &Path {
        match self {
            StitchMedia::Generation(artifact) => artifact.path(),
            StitchMedia::Placeholder(path) => path,
        }
    }

    /// Alarm id of the generation, if this is not the placeholder
    pub fn alarm_id(&self) -> Option<&str> {
        match self {
            StitchMedia::Generation(artifact) => Some(artifact.alarm_id()),
            StitchMedia::Placeholder(_) => None,
        }
    }
}
