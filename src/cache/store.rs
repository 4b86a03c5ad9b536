//! Per-camera alarm media cache
//!
//! Holds one snapshot slot and one stitch slot per camera. Concurrent
//! snapshot requests coalesce onto a single in-flight fetch; stitch
//! generations are rendered in the background and swapped in atomically,
//! so readers always see either the previous complete generation or the
//! new one, never a half-written file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::Mutex;

use crate::cache::error::CacheError;
use crate::cache::generation::{StitchArtifact, StitchMedia};
use crate::cache::render::MediaRenderer;
use crate::config::EngineConfig;
use crate::directory::{AlarmEvent, CameraId, DeviceDirectory};
use crate::stats::{EngineStats, LatencyBands};

type SnapshotFuture = Shared<BoxFuture<'static, Result<Bytes, CacheError>>>;
type StitchFuture = Shared<BoxFuture<'static, Result<Arc<StitchArtifact>, CacheError>>>;

/// Requested snapshot dimensions; zero means "native"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub width: u32,
    pub height: u32,
}

impl SnapshotRequest {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scale filter for the requested dimensions
    ///
    /// Never upscales, preserves aspect ratio, and rounds the result to
    /// even dimensions for 4:2:0 output. `None` when the native size was
    /// requested.
    pub fn resize_filter(&self) -> Option<String> {
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

#[derive(Default)]
struct SnapshotSlot {
    seq: u64,
    pending: Option<SnapshotFuture>,
}

struct PendingStitch {
    seq: u64,
    future: StitchFuture,
}

#[derive(Default)]
struct StitchSlot {
    next_seq: u64,
    pending: Option<PendingStitch>,
    current: Option<Arc<StitchArtifact>>,
}

/// Alarm media cache for one camera
pub struct AlarmMediaCache {
    camera: CameraId,
    directory: Arc<dyn DeviceDirectory>,
    renderer: Arc<dyn MediaRenderer>,
    stats: Arc<EngineStats>,
    scratch: PathBuf,
    placeholder: PathBuf,
    snapshot_ttl: Duration,
    stitch_frame_delay: Duration,
    bands: LatencyBands,
    snapshot: Arc<Mutex<SnapshotSlot>>,
    stitch: Arc<Mutex<StitchSlot>>,
}

impl AlarmMediaCache {
    pub fn new(
        camera: CameraId,
        directory: Arc<dyn DeviceDirectory>,
        renderer: Arc<dyn MediaRenderer>,
        stats: Arc<EngineStats>,
        config: &EngineConfig,
    ) -> Self {
        let scratch = config
            .scratch_dir
            .join(&camera.home_id)
            .join(&camera.device_id);
        Self {
            camera,
            directory,
            renderer,
            stats,
            scratch,
            placeholder: config.placeholder_stitch.clone(),
            snapshot_ttl: config.snapshot_ttl,
            stitch_frame_delay: config.stitch_frame_delay,
            bands: config.latency_bands,
            snapshot: Arc::new(Mutex::new(SnapshotSlot::default())),
            stitch: Arc::new(Mutex::new(StitchSlot::default())),
        }
    }

    pub fn camera(&self) -> &CameraId {
        &self.camera
    }

    /// Fetch a snapshot of the most recent alarm
    ///
    /// Concurrent callers share one upstream fetch; the fetched frame stays
    /// servable for the configured TTL before the slot is cleared. Resizing
    /// happens per request on top of the shared native frame.
    pub async fn get_snapshot(&self, request: SnapshotRequest) -> Result<Bytes, CacheError> {
        let fetch = {
            let mut slot = self.snapshot.lock().await;
            match &slot.pending {
                Some(pending) => pending.clone(),
                None => {
                    slot.seq += 1;
                    let fetch = self.native_snapshot_future();
                    slot.pending = Some(fetch.clone());
                    self.spawn_snapshot_expiry(slot.seq, fetch.clone());
                    fetch
                }
            }
        };

        let native = fetch.await?;
        self.renderer
            .resize_snapshot(native, request.resize_filter())
            .await
    }

    /// The stitch media currently servable for this camera
    ///
    /// Waits for an in-flight generation; falls back to the previous
    /// generation when the render failed, and to the placeholder when no
    /// generation has ever been produced.
    pub async fn get_stitch(&self) -> StitchMedia {
        let (pending, current) = {
            let slot = self.stitch.lock().await;
            (
                slot.pending.as_ref().map(|p| p.future.clone()),
                slot.current.clone(),
            )
        };

        if let Some(pending) = pending {
            match pending.await {
                Ok(artifact) => return StitchMedia::Generation(artifact),
                Err(e) => {
                    tracing::warn!(camera = %self.camera, error = %e, "Pending stitch failed, serving previous generation");
                }
            }
        }

        match current {
            Some(artifact) => StitchMedia::Generation(artifact),
            None => StitchMedia::Placeholder(self.placeholder.clone()),
        }
    }

    /// React to a new alarm event
    ///
    /// Starts a background render of the new frame sequence and resets the
    /// snapshot slot. An alarm without image media is ignored; the current
    /// generation stays servable.
    pub async fn on_new_alarm(&self, alarm: &AlarmEvent) {
        if alarm.image_urls.is_empty() {
            tracing::debug!(camera = %self.camera, alarm_id = %alarm.alarm_id, "Alarm carried no image media, keeping current generation");
            return;
        }

        {
            let mut slot = self.snapshot.lock().await;
            slot.seq += 1;
            slot.pending = None;
        }

        let (seq, render) = {
            let mut slot = self.stitch.lock().await;
            slot.next_seq += 1;
            let seq = slot.next_seq;

            let work_dir = self.scratch.join(format!("gen_{:06}", seq));
            let output = self
                .scratch
                .join(format!("stitch_{:06}_{}.mp4", seq, alarm.alarm_id));
            let renderer = Arc::clone(&self.renderer);
            let alarm_id = alarm.alarm_id.clone();
            let urls = alarm.image_urls.clone();
            let delay = self.stitch_frame_delay;
            let render: StitchFuture = async move {
                renderer
                    .render_stitch(&alarm_id, &urls, &work_dir, &output, delay)
                    .await?;
                Ok(Arc::new(StitchArtifact::new(output, alarm_id)))
            }
            .boxed()
            .shared();

            slot.pending = Some(PendingStitch {
                seq,
                future: render.clone(),
            });
            (seq, render)
        };

        tracing::info!(camera = %self.camera, alarm_id = %alarm.alarm_id, frames = alarm.image_urls.len(), "Stitch render started");
        self.spawn_stitch_driver(seq, alarm.alarm_id.clone(), render);
    }

    fn native_snapshot_future(&self) -> SnapshotFuture {
        let directory = Arc::clone(&self.directory);
        let renderer = Arc::clone(&self.renderer);
        let camera = self.camera.clone();
        async move {
            let state = directory
                .device_state(&camera)
                .await
                .map_err(|e| CacheError::UpstreamFetch(e.to_string()))?;
            let alarm = state.last_alarm.ok_or(CacheError::NoAlarmMedia)?;
            let url = alarm
                .image_urls
                .first()
                .cloned()
                .ok_or(CacheError::NoAlarmMedia)?;
            renderer.render_snapshot(&url).await
        }
        .boxed()
        .shared()
    }

    /// Drive a snapshot fetch to completion and expire the slot
    ///
    /// A failed fetch clears the slot immediately so the next request
    /// retries; a successful one stays servable for the TTL.
    fn spawn_snapshot_expiry(&self, seq: u64, fetch: SnapshotFuture) {
        let slot = Arc::clone(&self.snapshot);
        let stats = Arc::clone(&self.stats);
        let bands = self.bands;
        let ttl = self.snapshot_ttl;
        let camera = self.camera.to_string();
        tokio::spawn(async move {
            let started = Instant::now();
            let ok = fetch.await.is_ok();
            stats.record_render(ok);
            if ok {
                bands.observe(&camera, "Snapshot fetch", started.elapsed());
                tokio::time::sleep(ttl).await;
            }
            let mut slot = slot.lock().await;
            if slot.seq == seq {
                slot.pending = None;
            }
        });
    }

    fn spawn_stitch_driver(&self, seq: u64, alarm_id: String, render: StitchFuture) {
        let slot = Arc::clone(&self.stitch);
        let stats = Arc::clone(&self.stats);
        let bands = self.bands;
        let camera = self.camera.to_string();
        tokio::spawn(async move {
            let started = Instant::now();
            match render.await {
                Ok(artifact) => {
                    stats.record_render(true);
                    bands.observe(&camera, "Stitch render", started.elapsed());
                    let mut slot = slot.lock().await;
                    match &slot.pending {
                        Some(p) if p.seq == seq => {
                            tracing::info!(camera = %camera, alarm_id = %artifact.alarm_id(), "Stitch generation published");
                            slot.current = Some(artifact);
                            slot.pending = None;
                        }
                        // Superseded while rendering; dropping the last
                        // reference deletes the file.
                        _ => {
                            tracing::debug!(camera = %camera, alarm_id = %artifact.alarm_id(), "Stitch generation superseded before publish");
                        }
                    }
                }
                Err(e) => {
                    stats.record_render(false);
                    tracing::error!(camera = %camera, alarm_id = %alarm_id, error = %e, "Stitch render failed, previous generation retained");
                    let mut slot = slot.lock().await;
                    if let Some(p) = &slot.pending {
                        if p.seq == seq {
                            slot.pending = None;
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tokio::sync::Semaphore;
    use tokio::time::sleep;

    struct StubDirectory {
        last_alarm: Option<AlarmEvent>,
    }

    #[async_trait]
    impl DeviceDirectory for StubDirectory {
        async fn device_state(
            &self,
            camera: &CameraId,
        ) -> Result<crate::directory::DeviceState, crate::directory::DirectoryError> {
            Ok(crate::directory::DeviceState {
                camera: camera.clone(),
                last_alarm: self.last_alarm.clone(),
            })
        }
    }

    struct StubRenderer {
        snapshot_calls: AtomicU64,
        stitch_calls: AtomicU64,
        fail_stitch: AtomicBool,
        snapshot_gate: Semaphore,
        stitch_gate: Semaphore,
    }

    impl StubRenderer {
        fn open() -> Arc<Self> {
            Self::gated(100, 100)
        }

        fn gated(snapshot_permits: usize, stitch_permits: usize) -> Arc<Self> {
            Arc::new(Self {
                snapshot_calls: AtomicU64::new(0),
                stitch_calls: AtomicU64::new(0),
                fail_stitch: AtomicBool::new(false),
                snapshot_gate: Semaphore::new(snapshot_permits),
                stitch_gate: Semaphore::new(stitch_permits),
            })
        }
    }

    #[async_trait]
    impl MediaRenderer for StubRenderer {
        async fn render_snapshot(&self, _url: &str) -> Result<Bytes, CacheError> {
            self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.snapshot_gate.acquire().await.unwrap();
            Ok(Bytes::from_static(b"frame"))
        }

        async fn resize_snapshot(
            &self,
            snapshot: Bytes,
            _filter: Option<String>,
        ) -> Result<Bytes, CacheError> {
            Ok(snapshot)
        }

        async fn render_stitch(
            &self,
            alarm_id: &str,
            _image_urls: &[String],
            _work_dir: &Path,
            output: &Path,
            _frame_delay: Duration,
        ) -> Result<(), CacheError> {
            self.stitch_calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.stitch_gate.acquire().await.unwrap();
            if self.fail_stitch.load(Ordering::SeqCst) {
                return Err(CacheError::Encoder("stub failure".to_string()));
            }
            tokio::fs::create_dir_all(output.parent().unwrap())
                .await
                .unwrap();
            tokio::fs::write(output, alarm_id).await.unwrap();
            Ok(())
        }
    }

    fn alarm(id: &str, urls: &[&str]) -> AlarmEvent {
        AlarmEvent {
            alarm_id: id.to_string(),
            image_urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn cache_with(
        scratch: &Path,
        renderer: Arc<StubRenderer>,
        last_alarm: Option<AlarmEvent>,
    ) -> (AlarmMediaCache, Arc<EngineStats>) {
        let stats = Arc::new(EngineStats::new());
        let config = EngineConfig::with_scratch_dir(scratch)
            .placeholder_stitch(scratch.join("placeholder.mp4"))
            .snapshot_ttl(Duration::from_millis(50));
        let cache = AlarmMediaCache::new(
            CameraId::new("h1", "d1"),
            Arc::new(StubDirectory { last_alarm }),
            renderer,
            Arc::clone(&stats),
            &config,
        );
        (cache, stats)
    }

    #[test]
    fn test_resize_filter() {
        assert!(SnapshotRequest::new(0, 0).resize_filter().is_none());

        let filter = SnapshotRequest::new(1280, 720).resize_filter().unwrap();
        assert!(filter.contains("min(1280,iw)"));
        assert!(filter.contains("min(720,ih)"));
        assert!(filter.contains("force_original_aspect_ratio=decrease"));

        let filter = SnapshotRequest::new(640, 0).resize_filter().unwrap();
        assert!(filter.contains("min(640,iw)"));
        assert!(filter.contains(":'-2':"));
    }

    #[tokio::test]
    async fn test_snapshot_coalesces_concurrent_requests() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = StubRenderer::gated(0, 100);
        let (cache, _stats) = cache_with(
            dir.path(),
            Arc::clone(&renderer),
            Some(alarm("a1", &["http://x/1.jpg"])),
        );
        let cache = Arc::new(cache);

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move {
                cache.get_snapshot(SnapshotRequest::default()).await
            }));
        }
        sleep(Duration::from_millis(50)).await;
        renderer.snapshot_gate.add_permits(3);

        for task in tasks {
            let bytes = task.await.unwrap().unwrap();
            assert_eq!(&bytes[..], b"frame");
        }
        assert_eq!(renderer.snapshot_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_snapshot_without_alarm_errors() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = StubRenderer::open();
        let (cache, _stats) = cache_with(dir.path(), Arc::clone(&renderer), None);

        let err = cache
            .get_snapshot(SnapshotRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::NoAlarmMedia);
        assert_eq!(renderer.snapshot_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stitch_placeholder_before_any_alarm() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _stats) = cache_with(dir.path(), StubRenderer::open(), None);

        let media = cache.get_stitch().await;
        assert!(matches!(media, StitchMedia::Placeholder(_)));
        assert_eq!(media.path(), dir.path().join("placeholder.mp4"));
    }

    #[tokio::test]
    async fn test_new_alarm_publishes_generation() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = StubRenderer::open();
        let (cache, stats) = cache_with(dir.path(), Arc::clone(&renderer), None);

        cache.on_new_alarm(&alarm("a1", &["u1", "u2"])).await;
        let media = cache.get_stitch().await;

        assert_eq!(media.alarm_id(), Some("a1"));
        assert!(media.path().exists());
        sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.renders_completed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_failed_render_retains_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = StubRenderer::open();
        let (cache, stats) = cache_with(dir.path(), Arc::clone(&renderer), None);

        cache.on_new_alarm(&alarm("a1", &["u1"])).await;
        let first = cache.get_stitch().await;
        assert_eq!(first.alarm_id(), Some("a1"));

        renderer.fail_stitch.store(true, Ordering::SeqCst);
        cache.on_new_alarm(&alarm("a2", &["u2"])).await;

        let media = cache.get_stitch().await;
        assert_eq!(media.alarm_id(), Some("a1"));
        assert!(media.path().exists());
        sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.renders_failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_superseded_generation_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = StubRenderer::gated(100, 0);
        let (cache, _stats) = cache_with(dir.path(), Arc::clone(&renderer), None);

        cache.on_new_alarm(&alarm("a1", &["u1"])).await;
        cache.on_new_alarm(&alarm("a2", &["u2"])).await;
        renderer.stitch_gate.add_permits(2);

        let media = cache.get_stitch().await;
        assert_eq!(media.alarm_id(), Some("a2"));

        // The first render completes but its artifact is dropped unreferenced.
        sleep(Duration::from_millis(100)).await;
        let a1_path = dir.path().join("h1/d1/stitch_000001_a1.mp4");
        assert!(!a1_path.exists());
        assert!(media.path().exists());
    }

    #[tokio::test]
    async fn test_alarm_without_media_keeps_generation() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = StubRenderer::open();
        let (cache, _stats) = cache_with(dir.path(), Arc::clone(&renderer), None);

        cache.on_new_alarm(&alarm("a1", &["u1"])).await;
        let first = cache.get_stitch().await;

        cache.on_new_alarm(&alarm("a2", &[])).await;
        let media = cache.get_stitch().await;

        assert_eq!(media.alarm_id(), first.alarm_id());
        assert_eq!(renderer.stitch_calls.load(Ordering::SeqCst), 1);
    }
}
