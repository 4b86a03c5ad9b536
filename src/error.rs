//! Engine error types
//!
//! One crate-level enum covers the session/process surface; the cache keeps
//! its own clonable error type (see [`crate::cache::CacheError`]) because a
//! single failed render future is shared by every coalesced waiter.

use crate::cache::CacheError;
use crate::session::SessionPhase;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for engine operations
#[derive(Debug)]
pub enum Error {
    /// No session with the given id (caller protocol violation, not retried)
    SessionNotFound(String),
    /// Session exists but is not in a phase that accepts the operation
    SessionNotPending { id: String, phase: SessionPhase },
    /// Transient resource exhaustion (e.g. no free return port)
    ResourceAllocation(String),
    /// The media subprocess could not be launched at all
    ProcessCreation(String),
    /// The media subprocess crashed or emitted fatal diagnostics
    ProcessFatal(String),
    /// Alarm media cache failure
    Cache(CacheError),
    /// Underlying I/O failure
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            Error::SessionNotPending { id, phase } => {
                write!(f, "Session {} not pending (phase: {:?})", id, phase)
            }
            Error::ResourceAllocation(msg) => write!(f, "Resource allocation failed: {}", msg),
            Error::ProcessCreation(msg) => write!(f, "Process creation failed: {}", msg),
            Error::ProcessFatal(msg) => write!(f, "Process fatal error: {}", msg),
            Error::Cache(e) => write!(f, "Alarm media cache error: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Cache(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<CacheError> for Error {
    fn from(e: CacheError) -> Self {
        Error::Cache(e)
    }
}
