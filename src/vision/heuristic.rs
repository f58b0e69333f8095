use super::Classifier;
use crate::config::DetectionConfig;
use crate::types::{ClassificationVote, Label, VoteSource};
use image::RgbImage;
use imageproc::filter::laplacian_filter;

/// Surface measurements behind a heuristic verdict
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceMetrics {
    /// Fraction of pixels at or below the dark threshold
    pub dark_ratio: f32,
    /// Variance of the 3x3 Laplacian response
    pub laplacian_variance: f64,
    /// Combined defect score in [0, 1]
    pub defect_score: f32,
}

/// Hand-tuned dark-spot and texture rules
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    dark_threshold: u8,
    dark_ratio_weight: f32,
    texture_variance_min: f64,
    texture_penalty: f32,
    defect_score_threshold: f32,
}

impl HeuristicClassifier {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            dark_threshold: config.dark_threshold,
            dark_ratio_weight: config.dark_ratio_weight,
            texture_variance_min: config.texture_variance_min,
            texture_penalty: config.texture_penalty,
            defect_score_threshold: config.defect_score_threshold,
        }
    }

    pub fn measure(&self, roi: &RgbImage) -> Option<SurfaceMetrics> {
        if roi.width() == 0 || roi.height() == 0 {
            return None;
        }

        let gray = image::imageops::grayscale(roi);
        let total = (gray.width() * gray.height()) as f32;
        let dark = gray.pixels().filter(|p| p.0[0] <= self.dark_threshold).count() as f32;
        let dark_ratio = dark / total;

        let laplacian_variance = laplacian_variance(&gray);

        let texture = if laplacian_variance < self.texture_variance_min {
            self.texture_penalty
        } else {
            0.0
        };
        let defect_score = (dark_ratio * self.dark_ratio_weight + texture).min(1.0);

        Some(SurfaceMetrics {
            dark_ratio,
            laplacian_variance,
            defect_score,
        })
    }
}

impl Classifier for HeuristicClassifier {
    fn classify(&self, roi: &RgbImage) -> ClassificationVote {
        let Some(metrics) = self.measure(roi) else {
            return ClassificationVote::unknown(VoteSource::Heuristic);
        };

        log::trace!(
            "heuristic: dark_ratio={:.3} lap_var={:.1} score={:.3}",
            metrics.dark_ratio,
            metrics.laplacian_variance,
            metrics.defect_score
        );

        if metrics.defect_score >= self.defect_score_threshold {
            ClassificationVote::new(Label::Defective, metrics.defect_score, VoteSource::Heuristic)
        } else {
            ClassificationVote::new(Label::Acceptable, 1.0 - metrics.defect_score, VoteSource::Heuristic)
        }
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

fn laplacian_variance(gray: &image::GrayImage) -> f64 {
    let response = laplacian_filter(gray);
    let n = f64::from(response.width()) * f64::from(response.height());
    if n == 0.0 {
        return 0.0;
    }
    let mean = response.pixels().map(|p| f64::from(p.0[0])).sum::<f64>() / n;
    response
        .pixels()
        .map(|p| {
            let d = f64::from(p.0[0]) - mean;
            d * d
        })
        .sum::<f64>()
        / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn classifier() -> HeuristicClassifier {
        HeuristicClassifier::new(&DetectionConfig::default())
    }

    fn speckled(dark_every: u32) -> RgbImage {
        RgbImage::from_fn(100, 100, |x, y| {
            if (x + y * 100) % dark_every == 0 {
                Rgb([20, 10, 10])
            } else if (x + y) % 2 == 0 {
                Rgb([210, 90, 90])
            } else {
                Rgb([170, 70, 70])
            }
        })
    }

    #[test]
    fn test_clean_textured_surface_is_acceptable() {
        let vote = classifier().classify(&speckled(1000));
        assert_eq!(vote.label, Label::Acceptable);
        assert_eq!(vote.source, VoteSource::Heuristic);
        assert!(vote.confidence > 0.9);
    }

    #[test]
    fn test_dark_spots_are_defective() {
        // one pixel in four is dark: ratio 0.25 * 4 saturates the score
        let vote = classifier().classify(&speckled(4));
        assert_eq!(vote.label, Label::Defective);
        assert!((vote.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_flat_surface_gets_texture_penalty() {
        let flat = RgbImage::from_pixel(50, 50, Rgb([180, 60, 60]));
        let metrics = classifier().measure(&flat).unwrap();
        assert_eq!(metrics.laplacian_variance, 0.0);
        assert!((metrics.defect_score - 0.3).abs() < 1e-6);

        let vote = classifier().classify(&flat);
        assert_eq!(vote.label, Label::Acceptable);
        assert!((vote.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_empty_crop_is_unknown() {
        let vote = classifier().classify(&RgbImage::new(0, 0));
        assert_eq!(vote.label, Label::Unknown);
        assert_eq!(vote.confidence, 0.0);
    }
}
