//! Testing utilities for fruitscan
//!
//! Synthetic scenes, a scripted camera opener and fake classifiers/backends so the
//! lifecycle and pipeline can be exercised without hardware or a trained model.

pub mod synthetic_data;

use crate::errors::ScanError;
use crate::source::{FrameSource, SourceOpener, SourceRequest};
use crate::types::{
    ArtifactPaths, ClassificationVote, DetectionRecord, Frame, Label, RecordOrigin, VoteSource, NON_OBJECT_TYPE,
};
use crate::vision::{Classifier, InferenceBackend};
use chrono::Utc;
use image::RgbImage;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub use synthetic_data::{
    blemished_fruit_frame, blemished_fruit_image, empty_scene, empty_scene_image, healthy_fruit_frame,
    healthy_fruit_image, png_bytes,
};

/// What the synthetic camera is pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scene {
    Healthy,
    Blemished,
    Empty,
}

impl Scene {
    fn image(self) -> RgbImage {
        match self {
            Scene::Healthy => healthy_fruit_image(),
            Scene::Blemished => blemished_fruit_image(),
            Scene::Empty => empty_scene_image(),
        }
    }
}

struct OpenerState {
    opens: AtomicUsize,
    open_handles: AtomicUsize,
    failures_pending: AtomicUsize,
    panic_pending: AtomicBool,
    frames_served: AtomicU64,
    scene: Mutex<Scene>,
    frame_interval: Duration,
}

/// Camera stand-in whose behaviour tests can script.
#[derive(Clone)]
pub struct SyntheticOpener {
    state: Arc<OpenerState>,
}

impl SyntheticOpener {
    pub fn new(scene: Scene) -> Self {
        Self::with_interval(scene, Duration::from_millis(5))
    }

    pub fn with_interval(scene: Scene, frame_interval: Duration) -> Self {
        Self {
            state: Arc::new(OpenerState {
                opens: AtomicUsize::new(0),
                open_handles: AtomicUsize::new(0),
                failures_pending: AtomicUsize::new(0),
                panic_pending: AtomicBool::new(false),
                frames_served: AtomicU64::new(0),
                scene: Mutex::new(scene),
                frame_interval,
            }),
        }
    }

    /// Successful opens so far.
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Sources currently alive.
    pub fn open_handles(&self) -> usize {
        self.state.open_handles.load(Ordering::SeqCst)
    }

    pub fn frames_served(&self) -> u64 {
        self.state.frames_served.load(Ordering::SeqCst)
    }

    /// Make the next `n` open attempts fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.state.failures_pending.store(n, Ordering::SeqCst);
    }

    /// Make the next frame read panic inside the capture loop.
    pub fn panic_on_next_frame(&self) {
        self.state.panic_pending.store(true, Ordering::SeqCst);
    }

    pub fn set_scene(&self, scene: Scene) {
        *self.state.scene.lock().unwrap_or_else(PoisonError::into_inner) = scene;
    }
}

impl SourceOpener for SyntheticOpener {
    fn open(&self, request: &SourceRequest) -> Result<Box<dyn FrameSource>, ScanError> {
        let pending = self.state.failures_pending.load(Ordering::SeqCst);
        if pending > 0 {
            self.state.failures_pending.store(pending - 1, Ordering::SeqCst);
            return Err(ScanError::DeviceUnavailable(format!("synthetic camera {} refused to open", request.index)));
        }

        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticSource {
            state: self.state.clone(),
            index: request.index,
            sequence: 0,
        }))
    }
}

struct SyntheticSource {
    state: Arc<OpenerState>,
    index: u32,
    sequence: u64,
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<Frame, ScanError> {
        std::thread::sleep(self.state.frame_interval);
        if self.state.panic_pending.swap(false, Ordering::SeqCst) {
            panic!("synthetic camera {} crashed", self.index);
        }

        self.sequence += 1;
        self.state.frames_served.fetch_add(1, Ordering::SeqCst);
        let scene = *self.state.scene.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Frame::from_image(self.sequence, self.sequence * 33_333, scene.image()))
    }

    fn is_open(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("synthetic camera {}", self.index)
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.state.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Always returns the same vote.
#[derive(Debug, Clone, Copy)]
pub struct FixedClassifier {
    vote: ClassificationVote,
}

impl FixedClassifier {
    pub fn new(label: Label, confidence: f32, source: VoteSource) -> Self {
        Self {
            vote: ClassificationVote::new(label, confidence, source),
        }
    }
}

impl Classifier for FixedClassifier {
    fn classify(&self, _roi: &RgbImage) -> ClassificationVote {
        self.vote
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Fixed vote plus a call counter.
#[derive(Debug, Clone)]
pub struct CountingClassifier {
    vote: ClassificationVote,
    calls: Arc<AtomicUsize>,
}

impl CountingClassifier {
    pub fn new(label: Label, confidence: f32, source: VoteSource) -> Self {
        Self {
            vote: ClassificationVote::new(label, confidence, source),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Classifier for CountingClassifier {
    fn classify(&self, _roi: &RgbImage) -> ClassificationVote {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vote
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Returns canned scores.
#[derive(Debug, Clone)]
pub struct FixedBackend {
    scores: Vec<f32>,
}

impl FixedBackend {
    pub fn new(scores: Vec<f32>) -> Self {
        Self { scores }
    }
}

impl InferenceBackend for FixedBackend {
    fn infer(&mut self, input: &[f32], shape: [usize; 4]) -> Result<Vec<f32>, ScanError> {
        if input.len() != shape.iter().product::<usize>() {
            return Err(ScanError::InferenceFailure("input does not match shape".to_string()));
        }
        Ok(self.scores.clone())
    }

    fn describe(&self) -> String {
        "fixed scores".to_string()
    }
}

/// Sleeps before answering, to exercise the timeout.
#[derive(Debug, Clone)]
pub struct SlowBackend {
    delay: Duration,
}

impl SlowBackend {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl InferenceBackend for SlowBackend {
    fn infer(&mut self, _input: &[f32], _shape: [usize; 4]) -> Result<Vec<f32>, ScanError> {
        std::thread::sleep(self.delay);
        Ok(vec![1.0, 0.0])
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FailingBackend;

impl InferenceBackend for FailingBackend {
    fn infer(&mut self, _input: &[f32], _shape: [usize; 4]) -> Result<Vec<f32>, ScanError> {
        Err(ScanError::InferenceFailure("synthetic backend failure".to_string()))
    }
}

/// Panics for the first `remaining` calls, then favours `acceptable`.
#[derive(Debug, Clone)]
pub struct PanickingBackend {
    remaining: usize,
}

impl PanickingBackend {
    pub fn new(remaining: usize) -> Self {
        Self { remaining }
    }
}

impl InferenceBackend for PanickingBackend {
    fn infer(&mut self, _input: &[f32], _shape: [usize; 4]) -> Result<Vec<f32>, ScanError> {
        if self.remaining > 0 {
            self.remaining -= 1;
            panic!("synthetic backend panic");
        }
        Ok(vec![2.0, 0.0])
    }
}

/// Minimal record with the object/non-object fields filled consistently.
pub fn sample_record(label: Label) -> DetectionRecord {
    let is_object = label.is_object();
    DetectionRecord {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        label,
        confidence: 0.9,
        source: VoteSource::Fused,
        is_object,
        fruit_type: if is_object { "Apple".to_string() } else { NON_OBJECT_TYPE.to_string() },
        spoiled: label == Label::Defective,
        image_shape: [240, 320, 3],
        bbox: None,
        analysis_details: BTreeMap::new(),
        file_paths: ArtifactPaths::default(),
        origin: RecordOrigin::Manual,
    }
}
