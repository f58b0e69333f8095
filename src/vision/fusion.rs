use crate::types::{ClassificationVote, Label, VoteSource};

/// Combines the model and heuristic votes for one ROI.
#[derive(Debug, Clone, Copy)]
pub struct FusionEngine {
    trust_threshold: f32,
}

impl FusionEngine {
    pub fn new(trust_threshold: f32) -> Self {
        Self { trust_threshold }
    }

    pub fn trust_threshold(&self) -> f32 {
        self.trust_threshold
    }

    /// Fuse the votes for a valid ROI.
    ///
    /// - both agree on acceptable/defective: that label, max confidence, source `fused`
    /// - disagreement: the heuristic wins only when its confidence is strictly above the
    ///   trust threshold, otherwise the model's vote stands
    /// - no model vote: the heuristic vote passes through unchanged
    pub fn fuse(&self, model: Option<ClassificationVote>, heuristic: ClassificationVote) -> ClassificationVote {
        let Some(model) = model else {
            return heuristic;
        };

        if model.label == heuristic.label && model.label.is_object() {
            return ClassificationVote::new(
                model.label,
                model.confidence.max(heuristic.confidence),
                VoteSource::Fused,
            );
        }

        if heuristic.label.is_object() && heuristic.confidence > self.trust_threshold {
            log::debug!(
                "fusion: heuristic {}@{:.2} overrides model {}@{:.2}",
                heuristic.label,
                heuristic.confidence,
                model.label,
                model.confidence
            );
            return heuristic;
        }

        model
    }

    /// Verdict for frames whose ROI is invalid: both classifiers are skipped.
    pub fn no_object(&self) -> ClassificationVote {
        ClassificationVote::no_object()
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(0.9)
    }
}
