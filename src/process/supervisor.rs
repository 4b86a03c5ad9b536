//! Media subprocess supervision
//!
//! Wraps one external transcode invocation: asynchronous start, stderr
//! diagnostic scanning, first-output latency observation, and graceful stop
//! with a bounded grace period before a hard terminate.
//!
//! A live transcode owns an open-ended stream, so any spontaneous exit is a
//! fatal error regardless of the exit code; only an exit preceded by a stop
//! request is classified as expected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::process::command::MediaCommand;
use crate::stats::LatencyBands;

/// Why a supervised process terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Stop was requested before the exit
    ExpectedStop,
    /// The process exited spontaneously (any exit code)
    FatalError,
}

/// Events reported by the monitor task to the process owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A fatal diagnostic line was observed while the process was running
    FatalDiagnostic { line: String },
    /// The process exited
    Exited { reason: ExitReason },
}

/// Sender for process events
pub type ProcessEventSender = mpsc::UnboundedSender<ProcessEvent>;

/// Handle to a supervised streaming process
///
/// Dropping the handle does not terminate the process; call [`stop`].
/// The monitor task keeps supervising until the child exits.
///
/// [`stop`]: MediaProcessHandle::stop
#[derive(Debug)]
pub struct MediaProcessHandle {
    label: String,
    expected_stop: Arc<AtomicBool>,
    stop_tx: mpsc::Sender<()>,
    pid: Option<u32>,
}

impl MediaProcessHandle {
    /// Request graceful shutdown
    ///
    /// Sets the expected flag and arms the grace timer in the monitor; the
    /// child is hard-terminated if it outlives the grace period. Idempotent.
    pub fn stop(&self) {
        self.expected_stop.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.try_send(());
        tracing::debug!(label = %self.label, pid = ?self.pid, "Process stop requested");
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Supervisor for external media tool invocations
#[derive(Debug, Clone)]
pub struct MediaSupervisor {
    processor: String,
    stop_grace: Duration,
    bands: LatencyBands,
}

impl MediaSupervisor {
    pub fn new(processor: impl Into<String>, stop_grace: Duration, bands: LatencyBands) -> Self {
        Self {
            processor: processor.into(),
            stop_grace,
            bands,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.video_processor.clone(),
            config.stop_grace,
            config.latency_bands,
        )
    }

    /// The configured media tool
    pub fn processor(&self) -> &str {
        &self.processor
    }

    /// Start a long-running streaming invocation
    ///
    /// Returns as soon as the child is spawned; termination and diagnostics
    /// are reported through `events`.
    pub fn spawn_stream(
        &self,
        label: &str,
        command: &MediaCommand,
        events: ProcessEventSender,
    ) -> Result<MediaProcessHandle> {
        tracing::debug!(label = %label, command = %command, "Stream command");
        self.spawn_stream_command(label, command.build(&self.processor), events)
    }

    /// Start a streaming invocation from an already-built command
    ///
    /// Stdout and stderr must be piped.
    pub fn spawn_stream_command(
        &self,
        label: &str,
        mut command: Command,
        events: ProcessEventSender,
    ) -> Result<MediaProcessHandle> {
        let mut child = command
            .spawn()
            .map_err(|e| Error::ProcessCreation(e.to_string()))?;

        let pid = child.id();
        let started_at = Instant::now();
        let expected_stop = Arc::new(AtomicBool::new(false));
        let fatal_seen = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = mpsc::channel(1);

        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_scanner(
                label.to_string(),
                stderr,
                events.clone(),
                Arc::clone(&fatal_seen),
            );
        }
        if let Some(stdout) = child.stdout.take() {
            spawn_progress_observer(label.to_string(), stdout, started_at, self.bands);
        }

        let monitor = Monitor {
            label: label.to_string(),
            child,
            events,
            expected_stop: Arc::clone(&expected_stop),
            fatal_seen,
            stop_rx,
            stop_grace: self.stop_grace,
        };
        tokio::spawn(monitor.run());

        tracing::debug!(label = %label, pid = ?pid, "Media process started");

        Ok(MediaProcessHandle {
            label: label.to_string(),
            expected_stop,
            stop_tx,
            pid,
        })
    }

    /// Run an ephemeral render invocation to completion
    ///
    /// Captures stdout into a buffer when the command's sink is stdout; the
    /// buffer is empty for file sinks. Fails on spawn error, non-zero exit,
    /// or an empty capture where one was expected.
    pub async fn run_capture(&self, label: &str, command: &MediaCommand) -> Result<Bytes> {
        tracing::debug!(label = %label, command = %command, "Render command");
        self.run_capture_command(
            label,
            command.build(&self.processor),
            command.captures_stdout(),
            command.stdin_payload(),
        )
        .await
    }

    /// Run an already-built render command to completion
    pub async fn run_capture_command(
        &self,
        label: &str,
        mut command: Command,
        expect_stdout: bool,
        stdin_payload: Option<Bytes>,
    ) -> Result<Bytes> {
        let mut child = command
            .spawn()
            .map_err(|e| Error::ProcessCreation(e.to_string()))?;

        // Stdin, stdout and stderr are serviced concurrently so a filled
        // pipe can never wedge the child.
        if let Some(payload) = stdin_payload {
            if let Some(mut stdin) = child.stdin.take() {
                tokio::spawn(async move {
                    // A child that exits early breaks the pipe; that shows
                    // up in the exit status instead.
                    let _ = stdin.write_all(&payload).await;
                    let _ = stdin.shutdown().await;
                });
            }
        }

        let stderr_task = child.stderr.take().map(|stderr| {
            let label = label.to_string();
            tokio::spawn(async move { collect_stderr_tail(&label, stderr).await })
        });

        let mut output = Vec::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout
                .read_to_end(&mut output)
                .await
                .map_err(|e| Error::ProcessFatal(format!("reading render output: {}", e)))?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::ProcessFatal(e.to_string()))?;

        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if !status.success() {
            return Err(Error::ProcessFatal(format!(
                "render exited with {} ({})",
                status,
                stderr_tail.join(" | ")
            )));
        }
        if expect_stdout && output.is_empty() {
            return Err(Error::ProcessFatal("render produced no output".to_string()));
        }

        Ok(Bytes::from(output))
    }
}

struct Monitor {
    label: String,
    child: Child,
    events: ProcessEventSender,
    expected_stop: Arc<AtomicBool>,
    fatal_seen: Arc<AtomicBool>,
    stop_rx: mpsc::Receiver<()>,
    stop_grace: Duration,
}

impl Monitor {
    async fn run(mut self) {
        enum Next {
            Exited(std::io::Result<std::process::ExitStatus>),
            StopRequested(bool),
        }

        let next = tokio::select! {
            status = self.child.wait() => Next::Exited(status),
            stop = self.stop_rx.recv() => Next::StopRequested(stop.is_some()),
        };

        let status = match next {
            Next::Exited(status) => status,
            Next::StopRequested(true) => self.stop_with_grace().await,
            // Handle dropped without a stop request; keep supervising
            // until the child exits on its own.
            Next::StopRequested(false) => self.child.wait().await,
        };

        let expected = self.expected_stop.load(Ordering::SeqCst);
        match status {
            Ok(status) if expected => {
                tracing::debug!(label = %self.label, %status, "Media process exited (expected)");
                let _ = self.events.send(ProcessEvent::Exited {
                    reason: ExitReason::ExpectedStop,
                });
            }
            Ok(status) => {
                // Spontaneous exit of a wanted live stream; a zero code is
                // still a failure.
                if self.fatal_seen.load(Ordering::SeqCst) {
                    tracing::debug!(label = %self.label, %status, "Media process exited after fatal diagnostic");
                } else {
                    tracing::error!(label = %self.label, %status, "Media process exited without stop request");
                }
                let _ = self.events.send(ProcessEvent::Exited {
                    reason: ExitReason::FatalError,
                });
            }
            Err(e) => {
                tracing::error!(label = %self.label, error = %e, "Failed to reap media process");
                let _ = self.events.send(ProcessEvent::Exited {
                    reason: ExitReason::FatalError,
                });
            }
        }
    }

    async fn stop_with_grace(&mut self) -> std::io::Result<std::process::ExitStatus> {
        match timeout(self.stop_grace, self.child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::debug!(label = %self.label, "Grace period elapsed, terminating media process");
                if let Err(e) = self.child.start_kill() {
                    tracing::warn!(label = %self.label, error = %e, "Failed to terminate media process");
                }
                self.child.wait().await
            }
        }
    }
}

/// Diagnostic severity markers in the tool's own log format
const FATAL_MARKERS: [&str; 3] = ["[panic]", "[fatal]", "[error]"];

fn spawn_stderr_scanner(
    label: String,
    stderr: tokio::process::ChildStderr,
    events: ProcessEventSender,
    fatal_seen: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.is_empty() {
                continue;
            }
            if FATAL_MARKERS.iter().any(|m| line.contains(m)) {
                tracing::error!(label = %label, line = %line, "Media process diagnostic");
                if !fatal_seen.swap(true, Ordering::SeqCst) {
                    let _ = events.send(ProcessEvent::FatalDiagnostic { line });
                }
            } else {
                tracing::debug!(label = %label, line = %line, "Media process output");
            }
        }
    });
}

fn spawn_progress_observer(
    label: String,
    stdout: tokio::process::ChildStdout,
    started_at: Instant,
    bands: LatencyBands,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut first_seen = false;
        while let Ok(Some(line)) = lines.next_line().await {
            if first_seen {
                continue;
            }
            if let Some(frames) = parse_progress_frames(&line) {
                if frames > 0 {
                    first_seen = true;
                    bands.observe(&label, "First stream output", started_at.elapsed());
                }
            }
        }
    });
}

/// Parse a `frame=N` line from the tool's progress channel
fn parse_progress_frames(line: &str) -> Option<u64> {
    line.strip_prefix("frame=")?.trim().parse().ok()
}

async fn collect_stderr_tail(label: &str, stderr: tokio::process::ChildStderr) -> Vec<String> {
    const TAIL: usize = 4;
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.is_empty() {
            continue;
        }
        if FATAL_MARKERS.iter().any(|m| line.contains(m)) {
            tracing::error!(label = %label, line = %line, "Render diagnostic");
        } else {
            tracing::debug!(label = %label, line = %line, "Render output");
        }
        if tail.len() == TAIL {
            tail.remove(0);
        }
        tail.push(line);
    }
    tail
}
