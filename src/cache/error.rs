//! Cache error types
//!
//! Clonable: one failed render future is shared by every coalesced waiter.

/// Error type for alarm media cache operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The device directory collaborator failed; not retried by the cache
    UpstreamFetch(String),
    /// The device has never raised an alarm with image media
    NoAlarmMedia,
    /// A source image could not be downloaded
    Fetch(String),
    /// A source image could not be decoded
    Decode(String),
    /// The render/encode invocation failed
    Encoder(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::UpstreamFetch(msg) => write!(f, "Upstream fetch failed: {}", msg),
            CacheError::NoAlarmMedia => write!(f, "No alarm media available"),
            CacheError::Fetch(msg) => write!(f, "Image fetch failed: {}", msg),
            CacheError::Decode(msg) => write!(f, "Image decode failed: {}", msg),
            CacheError::Encoder(msg) => write!(f, "Render failed: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}
