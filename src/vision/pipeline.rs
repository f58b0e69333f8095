use super::{Classifier, FusionEngine, HeuristicClassifier, ModelClassifier, RoiDetector};
use crate::config::{DetectionConfig, FruitScanConfig};
use crate::errors::ScanError;
use crate::types::{ClassificationVote, DetectionRecord, Frame, RecordOrigin, RoiCandidate, NON_OBJECT_TYPE};
use chrono::Utc;
use std::collections::BTreeMap;

/// Whether the model runs for a given frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceMode {
    Run,
    Skip,
}

/// Everything computed for one frame.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub roi: RoiCandidate,
    pub model_vote: Option<ClassificationVote>,
    pub heuristic_vote: Option<ClassificationVote>,
    pub verdict: ClassificationVote,
    pub details: BTreeMap<String, String>,
}

/// ROI detection, both classifiers and fusion for a single frame.
pub struct FramePipeline {
    roi: RoiDetector,
    heuristic: Box<dyn Classifier>,
    model: Option<Box<dyn Classifier>>,
    fusion: FusionEngine,
    model_every_n_frames: u64,
    fruit_type: String,
}

impl FramePipeline {
    pub fn new(
        detection: &DetectionConfig,
        heuristic: Box<dyn Classifier>,
        model: Option<Box<dyn Classifier>>,
    ) -> Self {
        Self {
            roi: RoiDetector::new(detection),
            heuristic,
            model,
            fusion: FusionEngine::new(detection.heuristic_trust_threshold),
            model_every_n_frames: u64::from(detection.model_every_n_frames.max(1)),
            fruit_type: detection.fruit_type.clone(),
        }
    }

    /// Standard pipeline: built-in heuristics plus the configured model, if any.
    pub fn from_config(config: &FruitScanConfig) -> Result<Self, ScanError> {
        let heuristic = Box::new(HeuristicClassifier::new(&config.detection));
        let model = ModelClassifier::from_config(&config.model)?.map(|m| Box::new(m) as Box<dyn Classifier>);
        Ok(Self::new(&config.detection, heuristic, model))
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Live-loop sampling: the model runs on every Nth processed frame.
    pub fn mode_for(&self, processed_index: u64) -> InferenceMode {
        if processed_index % self.model_every_n_frames == 0 {
            InferenceMode::Run
        } else {
            InferenceMode::Skip
        }
    }

    pub fn analyze(&self, frame: &Frame, mode: InferenceMode) -> FrameAnalysis {
        let roi = self.roi.detect(frame);
        let mut details = BTreeMap::new();

        if let Some(alert) = self.roi.circularity_alert(&roi) {
            details.insert("alert".to_string(), alert);
        }
        if roi.bbox.is_some() {
            details.insert("roi_area".to_string(), roi.area.to_string());
            details.insert("circularity".to_string(), format!("{:.3}", roi.circularity));
        }

        let crop = match roi.crop(frame) {
            Some(crop) => crop,
            None => {
                return FrameAnalysis {
                    roi,
                    model_vote: None,
                    heuristic_vote: None,
                    verdict: self.fusion.no_object(),
                    details,
                };
            }
        };

        let heuristic_vote = self.heuristic.classify(&crop);
        let model_vote = match (&self.model, mode) {
            (Some(model), InferenceMode::Run) => Some(model.classify(&crop)),
            _ => None,
        };

        details.insert("heuristic_label".to_string(), heuristic_vote.label.to_string());
        details.insert("heuristic_confidence".to_string(), format!("{:.3}", heuristic_vote.confidence));
        if let Some(vote) = model_vote {
            details.insert("model_label".to_string(), vote.label.to_string());
            details.insert("model_confidence".to_string(), format!("{:.3}", vote.confidence));
        }

        let verdict = self.fusion.fuse(model_vote, heuristic_vote);
        log::debug!(
            "frame {}: {} ({}) {:.2}",
            frame.sequence,
            verdict.label,
            verdict.source.as_str(),
            verdict.confidence
        );

        FrameAnalysis {
            roi,
            model_vote,
            heuristic_vote: Some(heuristic_vote),
            verdict,
            details,
        }
    }

    /// Record for the analysis' own verdict.
    pub fn record(&self, frame: &Frame, analysis: &FrameAnalysis, origin: RecordOrigin) -> DetectionRecord {
        self.record_with_vote(frame, analysis, analysis.verdict, origin)
    }

    /// Record carrying `vote` (a settled verdict, for instance) with the frame's ROI context.
    pub fn record_with_vote(
        &self,
        frame: &Frame,
        analysis: &FrameAnalysis,
        vote: ClassificationVote,
        origin: RecordOrigin,
    ) -> DetectionRecord {
        let is_object = vote.label.is_object();
        DetectionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            label: vote.label,
            confidence: vote.confidence,
            source: vote.source,
            is_object,
            fruit_type: if is_object {
                self.fruit_type.clone()
            } else {
                NON_OBJECT_TYPE.to_string()
            },
            spoiled: vote.label == crate::types::Label::Defective,
            image_shape: frame.shape(),
            bbox: analysis.roi.bbox,
            analysis_details: analysis.details.clone(),
            file_paths: Default::default(),
            origin,
        }
    }
}
