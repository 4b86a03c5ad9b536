//! Stream session manager
//!
//! The session state machine: negotiates transport at prepare, binds the
//! media pipeline and keep-alive at start, and tears everything down on
//! stop or on any internal fault. Entry points are re-entrant for distinct
//! session ids; per-session faults never affect other sessions.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

use crate::cache::{AlarmMediaCache, SnapshotRequest};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::event::{EventSender, SessionEvent};
use crate::process::{
    ExitReason, InputSource, MediaCommand, MediaSupervisor, OutputSink, ProcessEvent,
};
use crate::session::keepalive::{KeepAliveMonitor, KeepAliveNotice};
use crate::session::params::VideoParameters;
use crate::session::state::{SessionPhase, SessionRuntime, StreamSession};
use crate::session::transport::{AddressVersion, PrepareRequest, PrepareResponse, TransportContext};
use crate::stats::EngineStats;

type SessionTable = Arc<RwLock<HashMap<String, StreamSession>>>;

/// Session-ending faults observed by the per-session watcher
enum Fault {
    Inactive,
    Socket(String),
    Process,
}

/// Per-camera session manager
///
/// Owns the live-session table; the keep-alive monitors and process
/// handles it creates are owned by their session and dropped with it.
pub struct StreamSessionManager {
    config: EngineConfig,
    supervisor: MediaSupervisor,
    cache: Arc<AlarmMediaCache>,
    sessions: SessionTable,
    events: EventSender,
    stats: Arc<EngineStats>,
}

impl StreamSessionManager {
    pub fn new(config: EngineConfig, cache: Arc<AlarmMediaCache>, events: EventSender) -> Self {
        let supervisor = MediaSupervisor::from_config(&config);
        Self {
            config,
            supervisor,
            cache,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            events,
            stats: Arc::new(EngineStats::new()),
        }
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    pub fn alarm_cache(&self) -> &Arc<AlarmMediaCache> {
        &self.cache
    }

    /// Number of sessions currently in the live table
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Phase of a live session, if any
    pub async fn phase(&self, session_id: &str) -> Option<SessionPhase> {
        self.sessions.read().await.get(session_id).map(|s| s.phase)
    }

    /// Negotiate transport for a new session
    ///
    /// Allocates an unused return port (the socket is retained so the port
    /// cannot be reused concurrently) and a fresh SSRC, stores the pending
    /// session, and echoes the supplied key material.
    pub async fn prepare(&self, request: PrepareRequest) -> Result<PrepareResponse> {
        let socket = self.bind_return_socket(request.address_version).await?;
        let local_port = socket.local_addr()?.port();

        let mut sessions = self.sessions.write().await;
        if let Some(stale) = sessions.remove(&request.session_id) {
            tracing::warn!(session_id = %request.session_id, phase = ?stale.phase, "Prepare for a live session id, replacing the stale entry");
            if let Some(runtime) = stale.runtime {
                runtime.keepalive.release();
                runtime.process.stop();
            }
            self.stats.record_ended();
        }

        let ssrc = loop {
            let candidate: u32 = rand::random();
            if !sessions.values().any(|s| s.transport.ssrc == candidate) {
                break candidate;
            }
        };

        let transport = TransportContext {
            target_address: request.target_address,
            target_port: request.target_port,
            local_port,
            ssrc,
            crypto: request.crypto,
            srtp: request.srtp.clone(),
        };
        sessions.insert(
            request.session_id.clone(),
            StreamSession::new(request.session_id.clone(), transport, socket),
        );
        drop(sessions);

        self.stats.record_prepared();
        tracing::info!(
            session_id = %request.session_id,
            local_port = local_port,
            ssrc = ssrc,
            target = %request.target_address,
            "Session prepared"
        );

        Ok(PrepareResponse {
            local_port,
            ssrc,
            srtp: request.srtp,
        })
    }

    /// Start the media pipeline for a prepared session
    ///
    /// Requires a pending entry; a second start on a starting or active
    /// session is rejected. A stop that races the start wins: the freshly
    /// spawned process is terminated, never leaked.
    pub async fn start(&self, session_id: &str, video: &VideoParameters) -> Result<()> {
        let (transport, socket) = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
            if session.phase != SessionPhase::Pending {
                return Err(Error::SessionNotPending {
                    id: session_id.to_string(),
                    phase: session.phase,
                });
            }
            session.phase = SessionPhase::Starting;
            (session.transport.clone(), session.socket.take())
        };

        let result = self.activate(session_id, video, &transport, socket).await;
        if result.is_err() {
            if self.sessions.write().await.remove(session_id).is_some() {
                self.stats.record_ended();
            }
        }
        result
    }

    /// Log and ignore a reconfigure request
    ///
    /// Live parameter changes are not applied to the bound process.
    pub async fn reconfigure(&self, session_id: &str, video: &VideoParameters) -> Result<()> {
        if !self.sessions.read().await.contains_key(session_id) {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        tracing::info!(
            session_id = %session_id,
            width = video.width,
            height = video.height,
            fps = video.fps,
            bitrate_kbps = video.bitrate_kbps,
            "Reconfigure request ignored, stream parameters stay fixed"
        );
        Ok(())
    }

    /// Tear a session down
    ///
    /// Idempotent: releases the keep-alive, requests graceful process
    /// termination, closes the return socket, and removes the entry.
    /// Unknown ids are a silent no-op.
    pub async fn stop(&self, session_id: &str) {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(session) => {
                if let Some(ref runtime) = session.runtime {
                    runtime.keepalive.release();
                    runtime.process.stop();
                }
                self.stats.record_ended();
                tracing::info!(
                    session_id = %session_id,
                    duration_secs = session.duration().as_secs_f64(),
                    "Session stopped"
                );
            }
            None => {
                tracing::debug!(session_id = %session_id, "Stop for unknown session ignored");
            }
        }
    }

    /// Stop every live session
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        tracing::info!(sessions = ids.len(), "Session manager shutting down");
        for id in ids {
            self.stop(&id).await;
        }
    }

    /// Fetch a snapshot of the most recent alarm
    pub async fn snapshot(&self, request: SnapshotRequest) -> Result<Bytes> {
        Ok(self.cache.get_snapshot(request).await?)
    }

    async fn bind_return_socket(&self, version: AddressVersion) -> Result<UdpSocket> {
        let mut last_error = None;
        for attempt in 1..=self.config.port_attempts {
            match UdpSocket::bind(version.bind_addr()).await {
                Ok(socket) => return Ok(socket),
                Err(e) => {
                    tracing::warn!(attempt = attempt, error = %e, "Return port bind failed");
                    last_error = Some(e);
                }
            }
        }
        Err(Error::ResourceAllocation(format!(
            "no return port after {} attempts: {}",
            self.config.port_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn activate(
        &self,
        session_id: &str,
        video: &VideoParameters,
        transport: &TransportContext,
        socket: Option<UdpSocket>,
    ) -> Result<()> {
        let socket = socket.ok_or_else(|| {
            Error::ResourceAllocation("return socket already consumed".to_string())
        })?;

        let video = match &self.config.ceilings {
            Some(ceilings) => video.clamped(ceilings, session_id),
            None => video.clone(),
        };

        let stitch = self.cache.get_stitch().await;
        let stitch_path = stitch.path().display().to_string();
        let command = self.stream_command(&video, transport, stitch.path());

        let (process_tx, process_rx) = mpsc::unbounded_channel();
        let handle = self.supervisor.spawn_stream(session_id, &command, process_tx)?;

        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let keepalive = KeepAliveMonitor::spawn(
            session_id.to_string(),
            socket,
            video.keepalive_window(),
            notice_tx,
        );

        // Re-check after the suspension points above: a stop that raced the
        // start has removed the entry and wins.
        {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(session_id) {
                Some(session) if session.phase == SessionPhase::Starting => {
                    session.phase = SessionPhase::Active;
                    session.runtime = Some(SessionRuntime {
                        process: handle,
                        keepalive,
                        stitch,
                    });
                }
                _ => {
                    tracing::debug!(session_id = %session_id, "Session stopped during start, terminating fresh process");
                    keepalive.release();
                    handle.stop();
                    return Ok(());
                }
            }
        }

        self.stats.record_started();
        self.spawn_watcher(session_id.to_string(), process_rx, notice_rx);
        tracing::info!(
            session_id = %session_id,
            width = video.width,
            height = video.height,
            fps = video.fps,
            bitrate_kbps = video.bitrate_kbps,
            stitch = %stitch_path,
            "Session active"
        );
        Ok(())
    }

    fn stream_command(
        &self,
        video: &VideoParameters,
        transport: &TransportContext,
        stitch: &Path,
    ) -> MediaCommand {
        let mut command = MediaCommand::new(
            InputSource::File(stitch.to_path_buf()),
            OutputSink::Target(transport.srtp_url(self.config.packet_size)),
        )
        .input_options(["-hide_banner", "-loglevel", "error"])
        .input_options(["-re", "-stream_loop", "-1"])
        .output_options(["-an", "-sn", "-dn"]);

        if let Some(filter) = video.scale_filter() {
            command = command.output_options(["-filter:v".to_string(), filter]);
        }

        command
            .output_options(["-codec:v", self.config.vcodec.as_str()])
            .output_options(["-pix_fmt", "yuv420p", "-color_range", "mpeg"])
            .output_options(["-r".to_string(), video.fps.to_string()])
            .output_options(self.config.encoder_options.iter().cloned())
            .output_options([
                "-b:v".to_string(),
                format!("{}k", video.bitrate_kbps),
                "-maxrate".to_string(),
                format!("{}k", video.bitrate_kbps),
                "-bufsize".to_string(),
                format!("{}k", video.bitrate_kbps * 2),
            ])
            .output_options(["-payload_type".to_string(), video.payload_type.to_string()])
            .output_options(["-ssrc".to_string(), transport.ssrc.to_string()])
            .output_options(["-f", "rtp"])
            .output_options(["-srtp_out_suite", transport.crypto.as_arg()])
            .output_options(["-srtp_out_params".to_string(), transport.srtp.key_material()])
            .output_options(["-progress", "pipe:1"])
    }

    /// Watch one session's fault sources until it ends
    ///
    /// Holds clones of the table and the event sender, not the manager.
    fn spawn_watcher(
        &self,
        session_id: String,
        mut process_rx: mpsc::UnboundedReceiver<ProcessEvent>,
        mut notice_rx: mpsc::UnboundedReceiver<KeepAliveNotice>,
    ) {
        let sessions = Arc::clone(&self.sessions);
        let events = self.events.clone();
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let mut notices_open = true;
            let fault = loop {
                tokio::select! {
                    event = process_rx.recv() => match event {
                        Some(ProcessEvent::FatalDiagnostic { line }) => {
                            tracing::error!(session_id = %session_id, line = %line, "Fatal pipeline diagnostic");
                            break Some(Fault::Process);
                        }
                        Some(ProcessEvent::Exited { reason: ExitReason::FatalError }) => {
                            break Some(Fault::Process);
                        }
                        // Expected exit after stop, or the monitor is gone.
                        Some(ProcessEvent::Exited { reason: ExitReason::ExpectedStop }) | None => {
                            break None;
                        }
                    },
                    notice = notice_rx.recv(), if notices_open => match notice {
                        Some(KeepAliveNotice::Expired) => break Some(Fault::Inactive),
                        Some(KeepAliveNotice::SocketError(message)) => break Some(Fault::Socket(message)),
                        None => notices_open = false,
                    },
                }
            };

            let Some(fault) = fault else {
                return;
            };

            // Same teardown as explicit stop; an already-removed session
            // means stop won the race and nothing is emitted.
            let removed = sessions.write().await.remove(&session_id);
            let Some(session) = removed else {
                return;
            };
            if let Some(runtime) = session.runtime {
                runtime.keepalive.release();
                runtime.process.stop();
            }
            stats.record_ended();

            let event = match fault {
                Fault::Inactive => {
                    tracing::warn!(session_id = %session_id, "Session inactive, tearing down");
                    SessionEvent::Inactive {
                        session_id: session_id.clone(),
                    }
                }
                Fault::Socket(message) => {
                    tracing::warn!(session_id = %session_id, error = %message, "Session socket error, tearing down");
                    SessionEvent::SessionError {
                        session_id: session_id.clone(),
                        message,
                    }
                }
                Fault::Process => {
                    tracing::warn!(session_id = %session_id, "Pipeline failure, tearing down");
                    SessionEvent::ProcessError {
                        session_id: session_id.clone(),
                    }
                }
            };
            let _ = events.send(event);
            let _ = events.send(SessionEvent::ForceStop {
                session_id: session_id.clone(),
            });
        });
    }
}
