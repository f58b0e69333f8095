//! Camera lifecycle and the background processing loop.
//!
//! [`CameraLifecycle`] is a cheap, cloneable handle. Control operations (`start`, `stop`,
//! `toggle_live`, `capture_once`) serialize on one control mutex; the loop publishes its
//! snapshot (state, live flag, smoother, latest frame and render, counters) under a
//! single shared mutex that readers only hold long enough to clone an `Arc`.
//!
//! States: `Stopped -> Starting -> Running <-> Live -> Stopping -> Stopped`, with any
//! state able to fall into `Error`, from which `stop` (or the cleanup inside `start`)
//! returns to `Stopped`.

use crate::config::FruitScanConfig;
use crate::errors::ScanError;
use crate::render::StreamRenderer;
use crate::smoothing::{SettleEvent, TemporalSmoother};
use crate::source::{decode_image_bytes, FrameSource, NokhwaOpener, SourceOpener, SourceRequest};
use crate::stats::{ArtifactWriter, StatsSnapshot, StatsStore};
use crate::types::{
    CameraState, CameraStatus, ClassificationVote, DetectionRecord, Frame, RecordOrigin, VoteSource,
};
use crate::vision::{FrameAnalysis, FramePipeline, InferenceMode};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Consecutive read failures after which the device is considered lost.
const MAX_READ_FAILURES: u32 = 10;
const READ_RETRY_DELAY: Duration = Duration::from_millis(20);
const JOIN_POLL: Duration = Duration::from_millis(5);

/// The most recent processed frame.
#[derive(Debug, Clone)]
pub struct LatestFrame {
    /// Start counter of the run that produced the frame
    pub generation: u64,
    pub frame: Arc<Frame>,
    pub analysis: FrameAnalysis,
    pub jpeg: Bytes,
    pub processed_at: DateTime<Utc>,
}

/// Liveness summary for a health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub model_loaded: bool,
    pub camera_state: CameraState,
    pub stats_persisted: bool,
    /// Stopped runs whose blocked read still holds a device open
    #[serde(default)]
    pub devices_pending_release: usize,
    pub timestamp: DateTime<Utc>,
}

struct Shared {
    state: CameraState,
    live: bool,
    smoother: TemporalSmoother,
    latest: Option<Arc<LatestFrame>>,
    frame_count: u64,
    source_index: Option<u32>,
    last_index: Option<u32>,
    last_error: Option<String>,
    generation: u64,
}

/// One started loop: its stop flag and the device it reads from.
struct Run {
    generation: u64,
    stop: AtomicBool,
    device: Mutex<Option<Box<dyn FrameSource>>>,
}

impl Run {
    fn release_device(&self) {
        let source = lock(&self.device).take();
        if let Some(source) = source {
            log::debug!("Releasing {}", source.describe());
            drop(source);
        }
    }
}

struct Inner {
    config: FruitScanConfig,
    opener: Box<dyn SourceOpener>,
    pipeline: FramePipeline,
    renderer: StreamRenderer,
    stats: StatsStore,
    artifacts: ArtifactWriter,
    control: Mutex<()>,
    shared: Mutex<Shared>,
    frame_ready: Condvar,
    run: Mutex<Option<Arc<Run>>>,
    loop_thread: Mutex<Option<JoinHandle<()>>>,
    /// Runs abandoned by a timed-out stop until their loop drops the device.
    pending_release: Mutex<Vec<Arc<Run>>>,
}

#[derive(Clone)]
pub struct CameraLifecycle {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CameraLifecycle {
    pub fn new(
        config: FruitScanConfig,
        opener: Box<dyn SourceOpener>,
        pipeline: FramePipeline,
        stats: StatsStore,
    ) -> Self {
        let renderer = StreamRenderer::new(config.storage.jpeg_quality);
        let artifacts = ArtifactWriter::new(&config.storage);
        let smoother = TemporalSmoother::from_config(&config.smoothing);

        Self {
            inner: Arc::new(Inner {
                config,
                opener,
                pipeline,
                renderer,
                stats,
                artifacts,
                control: Mutex::new(()),
                shared: Mutex::new(Shared {
                    state: CameraState::Stopped,
                    live: false,
                    smoother,
                    latest: None,
                    frame_count: 0,
                    source_index: None,
                    last_index: None,
                    last_error: None,
                    generation: 0,
                }),
                frame_ready: Condvar::new(),
                run: Mutex::new(None),
                loop_thread: Mutex::new(None),
                pending_release: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Lifecycle over `opener` with the pipeline and stats store described by `config`.
    pub fn with_opener(config: FruitScanConfig, opener: Box<dyn SourceOpener>) -> Result<Self, ScanError> {
        config.validate().map_err(ScanError::Config)?;
        let pipeline = FramePipeline::from_config(&config)?;
        let stats = StatsStore::open(&config.storage.stats_path, config.storage.history_limit)?;
        Ok(Self::new(config, opener, pipeline, stats))
    }

    /// Lifecycle over the system cameras.
    pub fn from_config(config: FruitScanConfig) -> Result<Self, ScanError> {
        Self::with_opener(config, Box::new(NokhwaOpener))
    }

    pub fn config(&self) -> &FruitScanConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> &StatsStore {
        &self.inner.stats
    }

    /// Open camera `index` and start the processing loop.
    ///
    /// Succeeds without side effects when the loop is already running on a healthy device.
    pub fn start(&self, index: u32) -> Result<CameraStatus, ScanError> {
        let _control = lock(&self.inner.control);
        self.start_locked(index)?;
        Ok(self.status())
    }

    /// Stop the loop and release the device. Stopping a stopped camera succeeds.
    pub fn stop(&self) -> Result<CameraStatus, ScanError> {
        let _control = lock(&self.inner.control);
        self.stop_locked();
        Ok(self.status())
    }

    /// Flip the live flag, starting the camera first if needed. Returns the new flag.
    pub fn toggle_live(&self) -> Result<bool, ScanError> {
        let _control = lock(&self.inner.control);
        if !self.status().is_running {
            let index = self.recovery_index();
            self.start_locked(index)
                .map_err(|e| ScanError::CannotEnableLive(e.to_string()))?;
        }

        let mut shared = lock(&self.inner.shared);
        if !shared.state.is_running() {
            let reason = shared
                .last_error
                .clone()
                .unwrap_or_else(|| "camera is not running".to_string());
            return Err(ScanError::CannotEnableLive(reason));
        }
        shared.live = !shared.live;
        shared.state = if shared.live { CameraState::Live } else { CameraState::Running };
        if shared.live {
            // an object already in view settles again and gets recorded
            shared.smoother.reset();
        }
        log::info!("Live mode {}", if shared.live { "enabled" } else { "disabled" });
        Ok(shared.live)
    }

    /// Record the current verdict regardless of the live flag or the smoother.
    ///
    /// Starts the camera if needed, waits for the first frame of the run, re-analyzes it
    /// with the model forced on, saves artifacts and persists the record.
    pub fn capture_once(&self) -> Result<DetectionRecord, ScanError> {
        let generation = {
            let _control = lock(&self.inner.control);
            if !self.status().is_running {
                let index = self.recovery_index();
                log::info!("Capture requested while stopped, starting camera {}", index);
                self.start_locked(index)?;
            }
            lock(&self.inner.shared).generation
        };

        let timeout = Duration::from_millis(self.inner.config.camera.first_frame_timeout_ms);
        let latest = self.wait_for_frame(generation, timeout)?;

        let analysis = self.inner.pipeline.analyze(&latest.frame, InferenceMode::Run);
        self.finish_record(&latest.frame, &analysis, RecordOrigin::Manual, "capture")
    }

    /// Run the full pipeline on one uploaded image and record the result.
    pub fn detect_image(&self, bytes: &[u8], filename: &str) -> Result<DetectionRecord, ScanError> {
        let image = decode_image_bytes(bytes)?;
        let frame = Frame::from_image(0, 0, image);
        log::info!("Analyzing upload {} ({}x{})", filename, frame.width(), frame.height());

        let analysis = self.inner.pipeline.analyze(&frame, InferenceMode::Run);
        self.finish_record(&frame, &analysis, RecordOrigin::Upload, filename)
    }

    pub fn status(&self) -> CameraStatus {
        let shared = lock(&self.inner.shared);
        CameraStatus {
            state: shared.state,
            is_running: shared.state.is_running(),
            is_live: shared.live,
            frame_count: shared.frame_count,
            source_index: shared.source_index,
            last_error: shared.last_error.clone(),
        }
    }

    pub fn latest(&self) -> Option<Arc<LatestFrame>> {
        lock(&self.inner.shared).latest.clone()
    }

    /// JPEG of the newest rendered frame. Pull-based: slow consumers just skip frames.
    pub fn latest_annotated_frame(&self) -> Result<Bytes, ScanError> {
        match self.latest() {
            Some(latest) if !latest.jpeg.is_empty() => Ok(latest.jpeg.clone()),
            _ => Err(ScanError::NoFrameAvailable("no frame has been processed yet".to_string())),
        }
    }

    pub fn get_stats(&self) -> Arc<StatsSnapshot> {
        self.inner.stats.read()
    }

    pub fn get_history(&self, limit: usize) -> (Vec<DetectionRecord>, usize) {
        self.inner.stats.history(limit)
    }

    /// Zero the statistics and forget the smoother's window.
    pub fn reset_stats(&self) -> Result<Arc<StatsSnapshot>, ScanError> {
        let snapshot = self.inner.stats.reset();
        lock(&self.inner.shared).smoother.reset();
        snapshot
    }

    pub fn health(&self) -> HealthReport {
        let state = lock(&self.inner.shared).state;
        let stats_persisted = !self.inner.stats.is_dirty();
        let devices_pending_release = self.devices_pending_release();
        let status = if state == CameraState::Error || !stats_persisted || devices_pending_release > 0 {
            "degraded"
        } else {
            "healthy"
        };
        HealthReport {
            status: status.to_string(),
            model_loaded: self.inner.pipeline.has_model(),
            camera_state: state,
            stats_persisted,
            devices_pending_release,
            timestamp: Utc::now(),
        }
    }

    /// Prune released runs and count the ones still holding a device.
    fn devices_pending_release(&self) -> usize {
        let mut pending = lock(&self.inner.pending_release);
        pending.retain(|run| match run.device.try_lock() {
            Ok(slot) => slot.is_some(),
            Err(TryLockError::WouldBlock) => true,
            Err(TryLockError::Poisoned(_)) => false,
        });
        pending.len()
    }

    fn recovery_index(&self) -> u32 {
        lock(&self.inner.shared)
            .last_index
            .unwrap_or(self.inner.config.camera.default_index)
    }

    fn finish_record(
        &self,
        frame: &Frame,
        analysis: &FrameAnalysis,
        origin: RecordOrigin,
        name_hint: &str,
    ) -> Result<DetectionRecord, ScanError> {
        let mut record = self.inner.pipeline.record(frame, analysis, origin);
        if self.inner.artifacts.is_enabled() {
            record.file_paths = self
                .inner
                .artifacts
                .save_images(frame, &analysis.roi, record.timestamp, name_hint);
            self.inner.artifacts.save_metadata(&record);
        }

        self.inner.stats.record(record.clone())?;
        log::info!(
            "Recorded {:?} detection: {} ({}) {:.2}",
            origin,
            record.label,
            record.source.as_str(),
            record.confidence
        );
        Ok(record)
    }

    fn wait_for_frame(&self, generation: u64, timeout: Duration) -> Result<Arc<LatestFrame>, ScanError> {
        let deadline = Instant::now() + timeout;
        let mut shared = lock(&self.inner.shared);
        loop {
            if let Some(latest) = shared.latest.as_ref().filter(|l| l.generation == generation) {
                return Ok(latest.clone());
            }
            if shared.generation != generation || !shared.state.is_running() {
                let reason = shared
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "camera stopped before a frame arrived".to_string());
                return Err(ScanError::NoFrameAvailable(reason));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ScanError::NoFrameAvailable(format!(
                    "no frame within {} ms",
                    timeout.as_millis()
                )));
            }
            let (guard, _) = self
                .inner
                .frame_ready
                .wait_timeout(shared, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            shared = guard;
        }
    }

    /// Whether the current run's thread is alive and its device still open.
    fn loop_is_healthy(&self) -> bool {
        let thread_alive = lock(&self.inner.loop_thread)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());

        let device_open = lock(&self.inner.run).as_ref().is_some_and(|run| match run.device.try_lock() {
            Ok(slot) => slot.as_ref().is_some_and(|source| source.is_open()),
            // the loop is mid-read
            Err(TryLockError::WouldBlock) => true,
            Err(TryLockError::Poisoned(_)) => false,
        });

        thread_alive && device_open
    }

    fn start_locked(&self, index: u32) -> Result<(), ScanError> {
        let already_running = {
            let shared = lock(&self.inner.shared);
            shared.state.is_running() && shared.source_index == Some(index)
        };
        if already_running && self.loop_is_healthy() {
            log::debug!("Camera {} already running", index);
            return Ok(());
        }

        // stale handle, crashed loop or different index
        self.stop_locked();

        let generation = {
            let mut shared = lock(&self.inner.shared);
            shared.state = CameraState::Starting;
            shared.last_error = None;
            shared.generation += 1;
            shared.frame_count = 0;
            shared.smoother.reset();
            shared.generation
        };
        log::info!("Starting camera {}", index);

        let camera = &self.inner.config.camera;
        std::thread::sleep(Duration::from_millis(camera.settle_delay_ms));

        let request = SourceRequest {
            index,
            width: camera.resolution[0],
            height: camera.resolution[1],
            fps: camera.target_fps,
        };

        let source = match self.inner.opener.open(&request) {
            Ok(source) => source,
            Err(first) => {
                log::warn!("Opening camera {} failed, retrying once: {}", index, first);
                std::thread::sleep(Duration::from_millis(camera.open_retry_delay_ms));
                match self.inner.opener.open(&request) {
                    Ok(source) => source,
                    Err(e) => {
                        let message = format!("camera {}: {}", index, e);
                        log::error!("Camera unavailable: {}", message);
                        let mut shared = lock(&self.inner.shared);
                        shared.state = CameraState::Error;
                        shared.last_error = Some(message.clone());
                        shared.source_index = None;
                        return Err(ScanError::DeviceUnavailable(message));
                    }
                }
            }
        };
        log::info!("Opened {}", source.describe());

        let run = Arc::new(Run {
            generation,
            stop: AtomicBool::new(false),
            device: Mutex::new(Some(source)),
        });

        {
            let mut shared = lock(&self.inner.shared);
            shared.state = CameraState::Running;
            shared.live = false;
            shared.source_index = Some(index);
            shared.last_index = Some(index);
        }

        let inner = self.inner.clone();
        let loop_run = run.clone();
        let spawned = std::thread::Builder::new()
            .name("fruitscan-capture".to_string())
            .spawn(move || processing_loop(inner, loop_run));

        match spawned {
            Ok(handle) => {
                *lock(&self.inner.run) = Some(run);
                *lock(&self.inner.loop_thread) = Some(handle);
                Ok(())
            }
            Err(e) => {
                run.release_device();
                let message = format!("failed to spawn processing loop: {}", e);
                let mut shared = lock(&self.inner.shared);
                shared.state = CameraState::Error;
                shared.last_error = Some(message.clone());
                Err(ScanError::DeviceUnavailable(message))
            }
        }
    }

    fn stop_locked(&self) {
        let run = lock(&self.inner.run).take();
        let handle = lock(&self.inner.loop_thread).take();

        if run.is_none() && handle.is_none() {
            let mut shared = lock(&self.inner.shared);
            if shared.state != CameraState::Stopped {
                log::info!("Clearing {:?} state", shared.state);
            }
            shared.state = CameraState::Stopped;
            shared.live = false;
            shared.source_index = None;
            shared.smoother.reset();
            return;
        }

        lock(&self.inner.shared).state = CameraState::Stopping;
        if let Some(run) = &run {
            run.stop.store(true, Ordering::SeqCst);
        }

        let timeout = Duration::from_millis(self.inner.config.camera.stop_timeout_ms);
        let joined = match handle {
            Some(handle) => join_with_timeout(handle, timeout),
            None => true,
        };

        if let Some(run) = &run {
            if joined {
                run.release_device();
            } else {
                log::warn!(
                    "Processing loop did not exit within {} ms; forcing release (degraded stop)",
                    timeout.as_millis()
                );
                match run.device.try_lock() {
                    Ok(mut slot) => drop(slot.take()),
                    Err(_) => {
                        log::warn!("Device still busy in the loop thread; it will be released when the read returns");
                        lock(&self.inner.pending_release).push(run.clone());
                    }
                }
            }
        }

        let mut shared = lock(&self.inner.shared);
        shared.state = CameraState::Stopped;
        shared.live = false;
        shared.source_index = None;
        shared.smoother.reset();
        self.inner.frame_ready.notify_all();
        log::info!("Camera stopped");
    }
}

/// Join `handle`, giving up after `timeout`. Returns whether the thread finished.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if handle.is_finished() {
            if handle.join().is_err() {
                log::warn!("Processing loop exited by panic");
            }
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        std::thread::sleep(JOIN_POLL);
    }
}

/// Releases the device when the loop ends and turns a panic into the `Error` state.
struct LoopGuard {
    inner: Arc<Inner>,
    run: Arc<Run>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.run.release_device();
        if std::thread::panicking() {
            log::error!("Processing loop crashed");
            let mut shared = lock(&self.inner.shared);
            if shared.generation == self.run.generation {
                shared.state = CameraState::Error;
                shared.live = false;
                shared.last_error = Some("processing loop crashed".to_string());
            }
            self.inner.frame_ready.notify_all();
        }
    }
}

fn processing_loop(inner: Arc<Inner>, run: Arc<Run>) {
    let _guard = LoopGuard {
        inner: inner.clone(),
        run: run.clone(),
    };
    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(inner.config.camera.target_fps.max(1)));
    let mut processed: u64 = 0;
    let mut failures: u32 = 0;

    log::debug!("Processing loop {} started", run.generation);

    while !run.stop.load(Ordering::SeqCst) {
        let cycle_start = Instant::now();

        let read = {
            let mut slot = lock(&run.device);
            match slot.as_mut() {
                Some(source) => source.read_frame(),
                None => break,
            }
        };

        let frame = match read {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(e) => {
                failures += 1;
                log::warn!("Frame read failed ({}/{}): {}", failures, MAX_READ_FAILURES, e);
                if failures >= MAX_READ_FAILURES {
                    let mut shared = lock(&inner.shared);
                    if shared.generation == run.generation {
                        shared.state = CameraState::Error;
                        shared.live = false;
                        shared.last_error = Some(format!("device lost: {}", e));
                    }
                    inner.frame_ready.notify_all();
                    break;
                }
                std::thread::sleep(READ_RETRY_DELAY);
                continue;
            }
        };

        let mode = inner.pipeline.mode_for(processed);
        let analysis = inner.pipeline.analyze(&frame, mode);

        if run.stop.load(Ordering::SeqCst) {
            log::debug!("Discarding in-flight frame {}", frame.sequence);
            break;
        }

        let live = lock(&inner.shared).live;
        let jpeg = match inner
            .renderer
            .render_jpeg(&frame, &analysis.roi, &analysis.verdict, live)
        {
            Ok(jpeg) => jpeg,
            Err(e) => {
                log::warn!("Rendering frame {} failed: {}", frame.sequence, e);
                Bytes::new()
            }
        };

        let frame = Arc::new(frame);
        let (settle, live) = {
            let mut shared = lock(&inner.shared);
            if shared.generation != run.generation {
                break;
            }
            shared.frame_count += 1;
            let settle = shared.smoother.push(analysis.verdict);
            shared.latest = Some(Arc::new(LatestFrame {
                generation: run.generation,
                frame: frame.clone(),
                analysis: analysis.clone(),
                jpeg,
                processed_at: Utc::now(),
            }));
            inner.frame_ready.notify_all();
            (settle, shared.live)
        };

        if let Some(event) = settle {
            record_settle(&inner, &frame, &analysis, event, live);
        }

        processed += 1;
        let elapsed = cycle_start.elapsed();
        if elapsed < frame_interval {
            std::thread::sleep(frame_interval - elapsed);
        }
    }

    log::debug!("Processing loop {} exiting after {} frames", run.generation, processed);
}

/// Live mode persists settled acceptable/defective verdicts.
fn record_settle(inner: &Inner, frame: &Frame, analysis: &FrameAnalysis, event: SettleEvent, live: bool) {
    if !live || !event.label.is_object() {
        return;
    }
    let vote = ClassificationVote::new(event.label, event.confidence, VoteSource::Fused);
    let record = inner
        .pipeline
        .record_with_vote(frame, analysis, vote, RecordOrigin::Live);
    match inner.stats.record(record) {
        Ok(_) => log::info!("Live settle recorded: {} ({} votes)", event.label, event.count),
        Err(e) => log::error!("Live settle not persisted: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scene, SyntheticOpener};
    use crate::types::Label;

    fn quick_config(dir: &std::path::Path) -> FruitScanConfig {
        let mut config = FruitScanConfig::default();
        config.camera.settle_delay_ms = 0;
        config.camera.open_retry_delay_ms = 0;
        config.camera.target_fps = 200;
        config.storage.stats_path = dir.join("stats.json").display().to_string();
        config.storage.output_directory = dir.join("captures").display().to_string();
        config.storage.save_artifacts = false;
        config
    }

    fn lifecycle(dir: &std::path::Path, opener: &SyntheticOpener) -> CameraLifecycle {
        CameraLifecycle::with_opener(quick_config(dir), Box::new(opener.clone())).unwrap()
    }

    #[test]
    fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let opener = SyntheticOpener::new(Scene::Healthy);
        let camera = lifecycle(dir.path(), &opener);

        assert!(camera.start(0).unwrap().is_running);
        assert!(camera.start(0).unwrap().is_running);
        assert_eq!(opener.opens(), 1);
        assert_eq!(opener.open_handles(), 1);

        camera.stop().unwrap();
        assert_eq!(opener.open_handles(), 0);
        assert_eq!(camera.status().state, CameraState::Stopped);
    }

    #[test]
    fn test_stop_when_stopped_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let opener = SyntheticOpener::new(Scene::Empty);
        let camera = lifecycle(dir.path(), &opener);

        let status = camera.stop().unwrap();
        assert_eq!(status.state, CameraState::Stopped);
        assert!(!status.is_running);
    }

    #[test]
    fn test_open_retries_once() {
        let dir = tempfile::tempdir().unwrap();
        let opener = SyntheticOpener::new(Scene::Healthy);
        let camera = lifecycle(dir.path(), &opener);

        opener.fail_next_opens(1);
        assert!(camera.start(0).is_ok());
        camera.stop().unwrap();

        opener.fail_next_opens(2);
        let err = camera.start(0).unwrap_err();
        assert!(matches!(err, ScanError::DeviceUnavailable(_)));
        let status = camera.status();
        assert_eq!(status.state, CameraState::Error);
        assert!(status.last_error.is_some());

        // recovers on the next attempt
        assert!(camera.start(0).unwrap().is_running);
        camera.stop().unwrap();
    }

    #[test]
    fn test_toggle_live_auto_starts() {
        let dir = tempfile::tempdir().unwrap();
        let opener = SyntheticOpener::new(Scene::Healthy);
        let camera = lifecycle(dir.path(), &opener);

        assert!(camera.toggle_live().unwrap());
        assert_eq!(camera.status().state, CameraState::Live);
        assert!(!camera.toggle_live().unwrap());
        assert_eq!(camera.status().state, CameraState::Running);
        camera.stop().unwrap();

        opener.fail_next_opens(2);
        assert!(matches!(camera.toggle_live(), Err(ScanError::CannotEnableLive(_))));
    }

    #[test]
    fn test_capture_after_stop_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let opener = SyntheticOpener::new(Scene::Blemished);
        let camera = lifecycle(dir.path(), &opener);

        camera.start(0).unwrap();
        camera.stop().unwrap();

        let record = camera.capture_once().unwrap();
        assert_eq!(record.label, Label::Defective);
        assert_eq!(record.origin, RecordOrigin::Manual);
        assert_eq!(camera.get_stats().summary.total_objects, 1);
        assert!(camera.status().is_running);
        assert_eq!(opener.opens(), 2);
        camera.stop().unwrap();
    }

    #[test]
    fn test_loop_panic_moves_to_error_and_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let opener = SyntheticOpener::new(Scene::Healthy);
        let camera = lifecycle(dir.path(), &opener);

        camera.start(0).unwrap();
        opener.panic_on_next_frame();

        let deadline = Instant::now() + Duration::from_secs(2);
        while camera.status().state != CameraState::Error && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(camera.status().state, CameraState::Error);
        assert_eq!(opener.open_handles(), 0);

        assert!(camera.start(0).unwrap().is_running);
        camera.stop().unwrap();
        assert_eq!(camera.status().state, CameraState::Stopped);
    }

    #[test]
    fn test_latest_frame_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let opener = SyntheticOpener::new(Scene::Healthy);
        let camera = lifecycle(dir.path(), &opener);

        assert!(matches!(camera.latest_annotated_frame(), Err(ScanError::NoFrameAvailable(_))));

        let generation = {
            camera.start(0).unwrap();
            lock(&camera.inner.shared).generation
        };
        let latest = camera.wait_for_frame(generation, Duration::from_secs(2)).unwrap();
        assert_eq!(latest.analysis.verdict.label, Label::Acceptable);

        let jpeg = camera.latest_annotated_frame().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(camera.status().frame_count >= 1);
        camera.stop().unwrap();
    }
}
