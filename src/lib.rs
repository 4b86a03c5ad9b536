//! Per-viewer SRTP camera streaming sessions backed by alarm media.
//!
//! The engine negotiates RTP/SRTP transport per viewer, supervises the
//! external media tool that produces the packet stream, watches session
//! liveness through RTCP-derived keep-alives, and maintains a per-camera
//! cache of alarm snapshot and stitched-clip media.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use alarmcam::cache::{AlarmMediaCache, ProcessorRenderer};
//! use alarmcam::directory::{CameraId, DeviceDirectory};
//! use alarmcam::session::StreamSessionManager;
//! use alarmcam::stats::EngineStats;
//! use alarmcam::EngineConfig;
//!
//! # async fn run(directory: Arc<dyn DeviceDirectory>) {
//! let config = EngineConfig::default();
//! let renderer = Arc::new(ProcessorRenderer::new(&config));
//! let cache = Arc::new(AlarmMediaCache::new(
//!     CameraId::new("home", "front-door"),
//!     directory,
//!     renderer,
//!     Arc::new(EngineStats::new()),
//!     &config,
//! ));
//! let (events, mut event_rx) = alarmcam::event::channel();
//! let manager = StreamSessionManager::new(config, cache, events);
//!
//! tokio::spawn(async move {
//!     while let Some(event) = event_rx.recv().await {
//!         println!("session event: {:?}", event);
//!     }
//! });
//! # let _ = manager;
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod event;
pub mod process;
pub mod session;
pub mod stats;

pub use cache::{AlarmMediaCache, SnapshotRequest, StitchMedia};
pub use config::{EngineConfig, StreamCeilings};
pub use directory::{AlarmEvent, CameraId, DeviceDirectory, DeviceState};
pub use error::{Error, Result};
pub use event::{EventReceiver, EventSender, SessionEvent};
pub use session::{
    PrepareRequest, PrepareResponse, SessionPhase, StreamSessionManager, VideoParameters,
};
