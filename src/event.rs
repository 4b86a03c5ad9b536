//! Engine events
//!
//! The manager reports session-ending conditions over an explicit channel
//! handed to it at construction. The hosting layer listens for `ForceStop`
//! to tear down the viewer-visible stream even when the peer never sent an
//! explicit stop.

use tokio::sync::mpsc;

/// Events surfaced by the session engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// No control packet arrived within the keep-alive window
    Inactive { session_id: String },
    /// Session-level failure (socket error, teardown problem)
    SessionError { session_id: String, message: String },
    /// The bound media process crashed or emitted fatal diagnostics
    ProcessError { session_id: String },
    /// The hosting layer must tear down the viewer side of this session
    ForceStop { session_id: String },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Inactive { session_id }
            | SessionEvent::SessionError { session_id, .. }
            | SessionEvent::ProcessError { session_id }
            | SessionEvent::ForceStop { session_id } => session_id,
        }
    }
}

/// Sender half handed to the manager at construction
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiver half kept by the hosting layer
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create the engine event channel
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
