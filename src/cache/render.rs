//! Alarm media rendering
//!
//! Turns alarm image URLs into servable media: single-frame snapshot
//! captures and stitched clips that loop a frame sequence as H.264 video.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::cache::error::CacheError;
use crate::config::EngineConfig;
use crate::process::{InputSource, MediaCommand, MediaSupervisor, OutputSink};

/// Renders alarm imagery into snapshot bytes and stitch clips
///
/// Seam for tests; the production implementation shells out to the
/// configured video processor.
#[async_trait]
pub trait MediaRenderer: Send + Sync {
    /// Capture one still frame from a source URL
    async fn render_snapshot(&self, url: &str) -> Result<Bytes, CacheError>;

    /// Re-encode a snapshot through an optional scale filter
    async fn resize_snapshot(
        &self,
        snapshot: Bytes,
        filter: Option<String>,
    ) -> Result<Bytes, CacheError>;

    /// Render an ordered frame sequence into a clip at `output`
    ///
    /// On success the output file is fully written and closed. Frame
    /// scratch files live under `work_dir` and are removed afterwards.
    async fn render_stitch(
        &self,
        alarm_id: &str,
        image_urls: &[String],
        work_dir: &Path,
        output: &Path,
        frame_delay: Duration,
    ) -> Result<(), CacheError>;
}

/// Renderer backed by the external video processor
pub struct ProcessorRenderer {
    supervisor: MediaSupervisor,
    client: reqwest::Client,
    vcodec: String,
    encoder_options: Vec<String>,
}

impl ProcessorRenderer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            supervisor: MediaSupervisor::from_config(config),
            client: reqwest::Client::new(),
            vcodec: config.vcodec.clone(),
            encoder_options: config.encoder_options.clone(),
        }
    }

    async fn fetch_image(&self, url: &str) -> Result<Bytes, CacheError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CacheError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| CacheError::Fetch(e.to_string()))?;
        response
            .bytes()
            .await
            .map_err(|e| CacheError::Fetch(e.to_string()))
    }
}

#[async_trait]
impl MediaRenderer for ProcessorRenderer {
    async fn render_snapshot(&self, url: &str) -> Result<Bytes, CacheError> {
        let command = MediaCommand::new(InputSource::Url(url.to_string()), OutputSink::Stdout)
            .input_options(["-hide_banner", "-loglevel", "error"])
            .output_options(["-frames:v", "1", "-f", "image2"]);

        self.supervisor
            .run_capture("snapshot", &command)
            .await
            .map_err(|e| CacheError::Encoder(e.to_string()))
    }

    async fn resize_snapshot(
        &self,
        snapshot: Bytes,
        filter: Option<String>,
    ) -> Result<Bytes, CacheError> {
        let filter = match filter {
            Some(filter) => filter,
            None => return Ok(snapshot),
        };

        let command = MediaCommand::new(InputSource::Buffer(snapshot), OutputSink::Stdout)
            .input_options(["-hide_banner", "-loglevel", "error"])
            .output_options(["-frames:v", "1", "-filter:v", filter.as_str(), "-f", "image2"]);

        self.supervisor
            .run_capture("snapshot-resize", &command)
            .await
            .map_err(|e| CacheError::Encoder(e.to_string()))
    }

    async fn render_stitch(
        &self,
        alarm_id: &str,
        image_urls: &[String],
        work_dir: &Path,
        output: &Path,
        frame_delay: Duration,
    ) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(|e| CacheError::Encoder(e.to_string()))?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::Encoder(e.to_string()))?;
        }

        let mut frames = Vec::with_capacity(image_urls.len());
        let mut canvas = None;
        for (index, url) in image_urls.iter().enumerate() {
            let bytes = self.fetch_image(url).await?;
            if canvas.is_none() {
                let decoded = image::load_from_memory(&bytes)
                    .map_err(|e| CacheError::Decode(e.to_string()))?;
                canvas = Some(even_canvas(decoded.width(), decoded.height()));
            }
            let frame = work_dir.join(format!("frame_{:03}.jpg", index));
            tokio::fs::write(&frame, &bytes)
                .await
                .map_err(|e| CacheError::Encoder(e.to_string()))?;
            frames.push(frame);
        }

        let (width, height) = match canvas {
            Some(canvas) => canvas,
            None => return Err(CacheError::NoAlarmMedia),
        };

        let list = work_dir.join("frames.ffconcat");
        let list_body = concat_list(&frames, frame_delay);
        tokio::fs::write(&list, list_body)
            .await
            .map_err(|e| CacheError::Encoder(e.to_string()))?;

        let filter = canvas_filter(width, height);
        let command = MediaCommand::new(
            InputSource::ConcatList(list),
            OutputSink::File(output.to_path_buf()),
        )
        .input_options(["-hide_banner", "-loglevel", "error"])
        .output_options(["-an", "-sn", "-dn"])
        .output_options(["-vf", filter.as_str(), "-pix_fmt", "yuv420p"])
        .output_option("-codec:v")
        .output_option(&self.vcodec)
        .output_options(self.encoder_options.iter().cloned())
        .output_options(["-movflags", "+faststart", "-y"]);

        let result = self
            .supervisor
            .run_capture(&format!("stitch:{}", alarm_id), &command)
            .await;

        if let Err(e) = tokio::fs::remove_dir_all(work_dir).await {
            tracing::warn!(alarm_id = %alarm_id, error = %e, "Failed to remove stitch work dir");
        }

        result
            .map(|_| ())
            .map_err(|e| CacheError::Encoder(e.to_string()))
    }
}

/// Canvas dimensions rounded down to even values
///
/// yuv420p subsampling rejects odd dimensions.
fn even_canvas(width: u32, height: u32) -> (u32, u32) {
    (width & !1, height & !1)
}

/// Scale-and-pad filter that centers every frame on a fixed canvas
fn canvas_filter(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
        w = width,
        h = height
    )
}

/// Concat demuxer list with a fixed per-frame duration
///
/// The demuxer ignores the duration of the final entry, so the last frame
/// is listed twice.
fn concat_list(frames: &[PathBuf], frame_delay: Duration) -> String {
    let mut body = String::from("ffconcat version 1.0\n");
    for frame in frames {
        body.push_str(&format!(
            "file '{}'\nduration {:.3}\n",
            frame.display(),
            frame_delay.as_secs_f64()
        ));
    }
    if let Some(last) = frames.last() {
        body.push_str(&format!("file '{}'\n", last.display()));
    }
    body
}
