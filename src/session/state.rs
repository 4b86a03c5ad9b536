//! Session state
//!
//! One record per viewer stream attempt, owned exclusively by the manager.
//! A session leaves the live table on any ending path; there is no
//! resurrection, a retried stream needs a fresh id.

use std::time::Instant;

use tokio::net::UdpSocket;

use crate::cache::StitchMedia;
use crate::process::MediaProcessHandle;
use crate::session::keepalive::KeepAliveMonitor;
use crate::session::transport::TransportContext;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Transport negotiated, waiting for start
    Pending,
    /// Start accepted, pipeline spawning
    Starting,
    /// Pipeline running, keep-alive armed
    Active,
}

/// Everything a running session owns
///
/// Dropped wholesale on teardown: the stitch reference releases the
/// artifact, the monitor and handle outlive it only through their tasks.
#[derive(Debug)]
pub(crate) struct SessionRuntime {
    pub process: MediaProcessHandle,
    pub keepalive: KeepAliveMonitor,
    /// Keeps the streamed generation's file alive while the process reads it
    #[allow(dead_code)]
    pub stitch: StitchMedia,
}

/// One live session record
#[derive(Debug)]
pub struct StreamSession {
    pub id: String,
    pub phase: SessionPhase,
    pub transport: TransportContext,
    pub created_at: Instant,
    /// Return socket held from prepare until the keep-alive takes it
    pub(crate) socket: Option<UdpSocket>,
    pub(crate) runtime: Option<SessionRuntime>,
}

impl StreamSession {
    pub(crate) fn new(id: String, transport: TransportContext, socket: UdpSocket) -> Self {
        Self {
            id,
            phase: SessionPhase::Pending,
            transport,
            created_at: Instant::now(),
            socket: Some(socket),
            runtime: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn duration(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}
