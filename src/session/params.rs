//! Video parameter policy
//!
//! Requested stream parameters pass through unchanged unless ceilings are
//! configured; the keep-alive window is derived from the peer-declared RTCP
//! interval once at session start and never renegotiated.

use std::time::Duration;

use crate::config::{StreamCeilings, KEEPALIVE_FACTOR};

/// Fallback keep-alive window for a missing or nonsensical RTCP interval
const DEFAULT_KEEPALIVE_WINDOW: Duration = Duration::from_secs(30);

/// Stream parameters requested by the viewer at start
#[derive(Debug, Clone, PartialEq)]
pub struct VideoParameters {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Maximum bitrate in kbit/s
    pub bitrate_kbps: u32,
    /// RTP payload type
    pub payload_type: u8,
    /// Peer-declared control packet interval in seconds
    pub rtcp_interval: f64,
}

impl VideoParameters {
    /// Apply configured ceilings, logging every clamp
    pub fn clamped(&self, ceilings: &StreamCeilings, session_id: &str) -> VideoParameters {
        let mut clamped = self.clone();
        clamped.width = apply_ceiling(self.width, ceilings.max_width, ceilings.force);
        clamped.height = apply_ceiling(self.height, ceilings.max_height, ceilings.force);
        clamped.fps = apply_ceiling(self.fps, ceilings.max_fps, ceilings.force);
        clamped.bitrate_kbps =
            apply_ceiling(self.bitrate_kbps, ceilings.max_bitrate_kbps, ceilings.force);

        if clamped != *self {
            tracing::info!(
                session_id = %session_id,
                requested = ?(self.width, self.height, self.fps, self.bitrate_kbps),
                applied = ?(clamped.width, clamped.height, clamped.fps, clamped.bitrate_kbps),
                "Requested parameters clamped to configured ceilings"
            );
        }
        clamped
    }

    /// Keep-alive window: RTCP interval times the fixed safety factor
    pub fn keepalive_window(&self) -> Duration {
        if !self.rtcp_interval.is_finite() || self.rtcp_interval <= 0.0 {
            return DEFAULT_KEEPALIVE_WINDOW;
        }
        Duration::from_secs_f64(self.rtcp_interval * KEEPALIVE_FACTOR)
    }

    /// Scale filter for the requested resolution
    ///
    /// Never upscales the source and keeps dimensions even for 4:2:0
    /// output. `None` when no resolution was requested.
    pub fn scale_filter(&self) -> Option<String> {
        if self.width == 0 && self.height == 0 {
            return None;
        }
        let w = if self.width > 0 {
            format!("min({},iw)", self.width)
        } else {
            "-2".to_string()
        };
        let h = if self.height > 0 {
            format!("min({},ih)", self.height)
        } else {
            "-2".to_string()
        };
        Some(format!(
            "scale='{}':'{}':force_original_aspect_ratio=decrease,scale=trunc(iw/2)*2:trunc(ih/2)*2",
            w, h
        ))
    }
}

fn apply_ceiling(requested: u32, ceiling: Option<u32>, force: bool) -> u32 {
    match ceiling {
        Some(max) if force => max,
        Some(max) if requested > max => max,
        _ => requested,
    }
}
