/// Per-frame vision pipeline
///
/// ROI segmentation, the two classifiers, fusion of their votes and the
/// [`pipeline::FramePipeline`] that strings them together for one frame.
pub mod fusion;
pub mod heuristic;
pub mod model;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pipeline;
pub mod roi;

use crate::types::ClassificationVote;
use image::RgbImage;

pub use fusion::FusionEngine;
pub use heuristic::HeuristicClassifier;
pub use model::{InferenceBackend, ModelClassifier};
pub use pipeline::{FrameAnalysis, FramePipeline, InferenceMode};
pub use roi::RoiDetector;

/// Anything that can grade a padded ROI crop.
pub trait Classifier: Send + Sync {
    /// Never fails: problems degrade to an `unknown` vote.
    fn classify(&self, roi: &RgbImage) -> ClassificationVote;

    fn name(&self) -> &'static str;
}
