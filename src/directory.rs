//! Device directory collaborator
//!
//! The directory supplies device state on demand, including the most recent
//! alarm event. It is an external service; this crate only defines the seam.

use async_trait::async_trait;

/// Identifies one camera to the directory service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CameraId {
    pub home_id: String,
    pub device_id: String,
}

impl CameraId {
    pub fn new(home_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            home_id: home_id.into(),
            device_id: device_id.into(),
        }
    }
}

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.home_id, self.device_id)
    }
}

/// The most recent alarm raised by a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmEvent {
    /// Identifier of the alarm event
    pub alarm_id: String,
    /// Ordered source image URLs captured for the alarm
    pub image_urls: Vec<String>,
}

/// Device state as returned by the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub camera: CameraId,
    /// Most recent alarm, if the device has ever raised one
    pub last_alarm: Option<AlarmEvent>,
}

/// Error returned by the directory collaborator
#[derive(Debug, Clone)]
pub struct DirectoryError(pub String);

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Device directory error: {}", self.0)
    }
}

impl std::error::Error for DirectoryError {}

/// Directory service seam
///
/// Implementations are assumed to return a consistent snapshot per call and
/// may fail transiently; the engine propagates failures without retrying.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Fetch the current state of one device
    async fn device_state(&self, camera: &CameraId) -> Result<DeviceState, DirectoryError>;
}
