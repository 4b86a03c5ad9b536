//! Engine configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::stats::LatencyBands;

/// Default RTP packet size for the SRTP output target
pub const DEFAULT_PACKET_SIZE: u32 = 1316;

/// Safety factor applied to the peer-declared RTCP interval
pub const KEEPALIVE_FACTOR: f64 = 5.0;

/// Optional per-device ceilings applied to requested stream parameters
///
/// When configured, requested values above a ceiling are clamped and logged.
/// With `force` set, the ceiling is applied even to smaller requests.
#[derive(Debug, Clone, Default)]
pub struct StreamCeilings {
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub max_fps: Option<u32>,
    pub max_bitrate_kbps: Option<u32>,
    pub force: bool,
}

/// Engine configuration options
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path or name of the external media tool
    pub video_processor: String,

    /// Scratch directory for per-camera cache artifacts
    pub scratch_dir: PathBuf,

    /// Static clip served before any alarm media has ever been produced
    pub placeholder_stitch: PathBuf,

    /// Video codec for the stream command
    pub vcodec: String,

    /// Extra encoder options appended to the stream command
    pub encoder_options: Vec<String>,

    /// RTP packet size for the SRTP target
    pub packet_size: u32,

    /// Optional requested-parameter ceilings
    pub ceilings: Option<StreamCeilings>,

    /// Grace period between a stop request and a hard terminate
    pub stop_grace: Duration,

    /// How long a fetched snapshot stays servable after completion
    pub snapshot_ttl: Duration,

    /// Per-frame display time in the stitched clip
    pub stitch_frame_delay: Duration,

    /// Latency thresholds for render and first-output observation
    pub latency_bands: LatencyBands,

    /// Attempts at allocating an unused return port before giving up
    pub port_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            video_processor: "ffmpeg".to_string(),
            scratch_dir: std::env::temp_dir().join("alarmcam"),
            placeholder_stitch: PathBuf::from("placeholder.mp4"),
            vcodec: "libx264".to_string(),
            encoder_options: vec![
                "-preset".to_string(),
                "ultrafast".to_string(),
                "-tune".to_string(),
                "zerolatency".to_string(),
            ],
            packet_size: DEFAULT_PACKET_SIZE,
            ceilings: None,
            stop_grace: Duration::from_secs(2),
            snapshot_ttl: Duration::from_secs(3),
            stitch_frame_delay: Duration::from_secs(2),
            latency_bands: LatencyBands::default(),
            port_attempts: 3,
        }
    }
}

impl EngineConfig {
    /// Create a config with a custom scratch directory
    pub fn with_scratch_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the media tool path
    pub fn video_processor(mut self, processor: impl Into<String>) -> Self {
        self.video_processor = processor.into();
        self
    }

    /// Set the placeholder clip path
    pub fn placeholder_stitch(mut self, path: impl Into<PathBuf>) -> Self {
        self.placeholder_stitch = path.into();
        self
    }

    /// Set requested-parameter ceilings
    pub fn ceilings(mut self, ceilings: StreamCeilings) -> Self {
        self.ceilings = Some(ceilings);
        self
    }

    /// Set the stop grace period
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Set the snapshot time-to-live
    pub fn snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.snapshot_ttl = ttl;
        self
    }

    /// Set the per-frame delay of the stitched clip
    pub fn stitch_frame_delay(mut self, delay: Duration) -> Self {
        self.stitch_frame_delay = delay;
        self
    }

    /// Set the latency band thresholds
    pub fn latency_bands(mut self, bands: LatencyBands) -> Self {
        self.latency_bands = bands;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();

        assert_eq!(config.video_processor, "ffmpeg");
        assert_eq!(config.vcodec, "libx264");
        assert_eq!(config.packet_size, DEFAULT_PACKET_SIZE);
        assert!(config.ceilings.is_none());
        assert_eq!(config.stop_grace, Duration::from_secs(2));
        assert_eq!(config.snapshot_ttl, Duration::from_secs(3));
    }

    #[test]
    fn test_builder_chaining() {
        let config = EngineConfig::with_scratch_dir("/tmp/cams")
            .video_processor("/usr/local/bin/ffmpeg")
            .stop_grace(Duration::from_secs(5))
            .snapshot_ttl(Duration::from_secs(10))
            .ceilings(StreamCeilings {
                max_width: Some(1280),
                ..Default::default()
            });

        assert_eq!(config.scratch_dir, PathBuf::from("/tmp/cams"));
        assert_eq!(config.video_processor, "/usr/local/bin/ffmpeg");
        assert_eq!(config.stop_grace, Duration::from_secs(5));
        assert_eq!(config.snapshot_ttl, Duration::from_secs(10));
        assert_eq!(config.ceilings.unwrap().max_width, Some(1280));
    }
}
