//! Core data types shared by the capture loop, the vision pipeline and the stats store.

use chrono::{DateTime, Utc};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A raw RGB8 frame. Immutable once emitted by a [`crate::source::FrameSource`].
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub timestamp_us: u64,
    image: RgbImage,
}

impl Frame {
    pub const CHANNELS: u32 = 3;

    /// Build a frame from tightly packed RGB8 bytes.
    ///
    /// Returns `None` when the buffer length does not match `width * height * 3`.
    pub fn from_rgb(sequence: u64, timestamp_us: u64, width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let image = RgbImage::from_raw(width, height, data)?;
        Some(Self {
            sequence,
            timestamp_us,
            image,
        })
    }

    pub fn from_image(sequence: u64, timestamp_us: u64, image: RgbImage) -> Self {
        Self {
            sequence,
            timestamp_us,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn data(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// `[height, width, channels]`, the layout recorded in detection records.
    pub fn shape(&self) -> [u32; 3] {
        [self.height(), self.width(), Self::CHANNELS]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Grow the box by `pad` on every side without leaving a `frame_width` x `frame_height` frame.
    pub fn padded(&self, pad: u32, frame_width: u32, frame_height: u32) -> Self {
        let x0 = self.x.saturating_sub(pad);
        let y0 = self.y.saturating_sub(pad);
        let x1 = (self.x + self.width).saturating_add(pad).min(frame_width);
        let y1 = (self.y + self.height).saturating_add(pad).min(frame_height);
        Self {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }
}

/// Region-of-interest candidate produced for every analyzed frame.
#[derive(Debug, Clone)]
pub struct RoiCandidate {
    /// Padded bounding box of the selected component, if any component was found.
    pub bbox: Option<BoundingBox>,
    /// Binary mask with the same dimensions as the source frame.
    pub mask: GrayImage,
    pub area: u32,
    pub circularity: f32,
    pub valid: bool,
}

impl RoiCandidate {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            bbox: None,
            mask: GrayImage::new(width, height),
            area: 0,
            circularity: 0.0,
            valid: false,
        }
    }

    /// Crop the padded box out of `frame`. `None` for invalid candidates.
    pub fn crop(&self, frame: &Frame) -> Option<RgbImage> {
        if !self.valid {
            return None;
        }
        let bbox = self.bbox?;
        if bbox.width == 0 || bbox.height == 0 {
            return None;
        }
        Some(image::imageops::crop_imm(frame.image(), bbox.x, bbox.y, bbox.width, bbox.height).to_image())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Acceptable,
    Defective,
    Unknown,
    NoObject,
}

impl Label {
    pub const ALL: [Label; 4] = [Label::Acceptable, Label::Defective, Label::Unknown, Label::NoObject];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Acceptable => "acceptable",
            Label::Defective => "defective",
            Label::Unknown => "unknown",
            Label::NoObject => "no_object",
        }
    }

    /// Acceptable or defective: a real object was seen and graded.
    pub fn is_object(&self) -> bool {
        matches!(self, Label::Acceptable | Label::Defective)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteSource {
    Model,
    Heuristic,
    Fused,
}

impl VoteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteSource::Model => "model",
            VoteSource::Heuristic => "heuristic",
            VoteSource::Fused => "fused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationVote {
    pub label: Label,
    pub confidence: f32,
    pub source: VoteSource,
}

impl ClassificationVote {
    /// Confidence is clamped into `[0, 1]`; NaN becomes 0.
    pub fn new(label: Label, confidence: f32, source: VoteSource) -> Self {
        let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        Self {
            label,
            confidence,
            source,
        }
    }

    pub fn unknown(source: VoteSource) -> Self {
        Self::new(Label::Unknown, 0.0, source)
    }

    pub fn no_object() -> Self {
        Self::new(Label::NoObject, 1.0, VoteSource::Fused)
    }
}

/// Where a detection record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    Live,
    Manual,
    Upload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub original: Option<String>,
    pub roi: Option<String>,
    pub mask: Option<String>,
}

/// Persisted unit of the detection history. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub label: Label,
    pub confidence: f32,
    pub source: VoteSource,
    pub is_object: bool,
    pub fruit_type: String,
    pub spoiled: bool,
    pub image_shape: [u32; 3],
    pub bbox: Option<BoundingBox>,
    #[serde(default)]
    pub analysis_details: BTreeMap<String, String>,
    #[serde(default)]
    pub file_paths: ArtifactPaths,
    pub origin: RecordOrigin,
}

/// Tag recorded for detections that are not objects.
pub const NON_OBJECT_TYPE: &str = "None";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraState {
    Stopped,
    Starting,
    Running,
    Live,
    Stopping,
    Error,
}

impl CameraState {
    pub fn is_running(&self) -> bool {
        matches!(self, CameraState::Running | CameraState::Live)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraStatus {
    pub state: CameraState,
    pub is_running: bool,
    pub is_live: bool,
    pub frame_count: u64,
    pub source_index: Option<u32>,
    pub last_error: Option<String>,
}
