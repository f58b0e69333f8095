//! Trained-model classifier.
//!
//! The model itself is opaque: anything implementing [`InferenceBackend`] can be
//! plugged in. Calls run on a dedicated worker thread so a stuck backend can never
//! hold up the capture loop longer than the configured timeout.

use super::Classifier;
use crate::config::ModelConfig;
use crate::errors::ScanError;
use crate::types::{ClassificationVote, Label, VoteSource};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use image::imageops::FilterType;
use image::RgbImage;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

/// Inference contract: NCHW f32 input of shape `[1, 3, S, S]`, flat f32 scores out.
pub trait InferenceBackend: Send {
    fn infer(&mut self, input: &[f32], shape: [usize; 4]) -> Result<Vec<f32>, ScanError>;

    fn describe(&self) -> String {
        "inference backend".to_string()
    }
}

type InferenceReply = Result<Vec<f32>, ScanError>;

struct InferenceRequest {
    input: Vec<f32>,
    shape: [usize; 4],
    reply: Sender<InferenceReply>,
}

pub struct ModelClassifier {
    requests: Option<Sender<InferenceRequest>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    input_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
    timeout: Duration,
    description: String,
}

impl ModelClassifier {
    pub fn new(backend: Box<dyn InferenceBackend>, config: &ModelConfig) -> Result<Self, ScanError> {
        let description = backend.describe();
        // Room for one queued request; a second concurrent caller is told the worker is busy.
        let (tx, rx) = bounded::<InferenceRequest>(1);

        let worker = std::thread::Builder::new()
            .name("fruitscan-inference".to_string())
            .spawn(move || inference_worker(backend, rx))
            .map_err(|e| ScanError::InferenceFailure(format!("Failed to spawn inference worker: {}", e)))?;

        log::info!("Model classifier ready ({})", description);

        Ok(Self {
            requests: Some(tx),
            worker: Mutex::new(Some(worker)),
            input_size: config.input_size,
            mean: config.mean,
            std: config.std,
            timeout: Duration::from_millis(config.inference_timeout_ms),
            description,
        })
    }

    /// Build the classifier named by `config.path`, if any.
    ///
    /// A missing file or a build without ONNX support is logged and yields `None`, so the
    /// pipeline falls back to heuristics only.
    pub fn from_config(config: &ModelConfig) -> Result<Option<Self>, ScanError> {
        let Some(path) = config.path.as_deref() else {
            log::info!("No model configured, running heuristic-only");
            return Ok(None);
        };

        if !std::path::Path::new(path).exists() {
            log::warn!("Model file {} not found, running heuristic-only", path);
            return Ok(None);
        }

        #[cfg(feature = "onnx")]
        {
            let backend = super::onnx::OnnxBackend::load(path)?;
            Self::new(Box::new(backend), config).map(Some)
        }

        #[cfg(not(feature = "onnx"))]
        {
            log::warn!(
                "Model {} configured but fruitscan was built without the `onnx` feature; running heuristic-only",
                path
            );
            Ok(None)
        }
    }

    pub fn describe(&self) -> &str {
        &self.description
    }

    /// Resize, scale to [0, 1], normalize per channel and lay out as CHW.
    pub fn preprocess(&self, roi: &RgbImage) -> Vec<f32> {
        let size = self.input_size;
        let resized = image::imageops::resize(roi, size, size, FilterType::Triangle);
        let plane = (size * size) as usize;
        let mut tensor = vec![0.0f32; plane * 3];

        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                let v = f32::from(pixel.0[c]) / 255.0;
                tensor[c * plane + i] = (v - self.mean[c]) / self.std[c];
            }
        }
        tensor
    }

    /// Run the backend with the timeout applied. Errors are returned, not absorbed.
    pub fn predict(&self, roi: &RgbImage) -> Result<ClassificationVote, ScanError> {
        if roi.width() == 0 || roi.height() == 0 {
            return Err(ScanError::InferenceFailure("empty ROI".to_string()));
        }

        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| ScanError::InferenceFailure("inference worker shut down".to_string()))?;

        let size = self.input_size as usize;
        let (reply_tx, reply_rx) = bounded(1);
        let request = InferenceRequest {
            input: self.preprocess(roi),
            shape: [1, 3, size, size],
            reply: reply_tx,
        };

        match requests.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                return Err(ScanError::InferenceFailure("inference worker busy".to_string()));
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(ScanError::InferenceFailure("inference worker exited".to_string()));
            }
        }

        let scores = match reply_rx.recv_timeout(self.timeout) {
            Ok(reply) => reply?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(ScanError::InferenceTimeout(self.timeout.as_millis() as u64));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ScanError::InferenceFailure("inference worker dropped the request".to_string()));
            }
        };

        interpret_scores(&scores)
    }
}

impl Classifier for ModelClassifier {
    fn classify(&self, roi: &RgbImage) -> ClassificationVote {
        match self.predict(roi) {
            Ok(vote) => vote,
            Err(e) => {
                log::warn!("Model inference degraded to unknown: {}", e);
                ClassificationVote::unknown(VoteSource::Model)
            }
        }
    }

    fn name(&self) -> &'static str {
        "model"
    }
}

impl Drop for ModelClassifier {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once the current request finishes.
        self.requests.take();
        let handle = self
            .worker
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::debug!("Inference worker still busy at shutdown, detaching");
            }
        }
    }
}

fn inference_worker(mut backend: Box<dyn InferenceBackend>, requests: Receiver<InferenceRequest>) {
    for request in requests.iter() {
        let result = catch_unwind(AssertUnwindSafe(|| backend.infer(&request.input, request.shape)))
            .unwrap_or_else(|_| Err(ScanError::InferenceFailure("inference backend panicked".to_string())));
        // The caller may have timed out and gone away.
        let _ = request.reply.send(result);
    }
    log::debug!("Inference worker exiting");
}

/// Two or more scores: softmax over classes, index 0 = acceptable. One score: sigmoid of
/// P(defective).
pub fn interpret_scores(scores: &[f32]) -> Result<ClassificationVote, ScanError> {
    if scores.is_empty() {
        return Err(ScanError::InferenceFailure("model returned no scores".to_string()));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(ScanError::InferenceFailure("model returned non-finite scores".to_string()));
    }

    if scores.len() >= 2 {
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
        let sum: f32 = exps.iter().sum();

        let (best, best_exp) = exps
            .iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |acc, (i, &e)| if e > acc.1 { (i, e) } else { acc });

        let label = if best == 0 { Label::Acceptable } else { Label::Defective };
        Ok(ClassificationVote::new(label, best_exp / sum, VoteSource::Model))
    } else {
        let p_defective = 1.0 / (1.0 + (-scores[0]).exp());
        if p_defective >= 0.5 {
            Ok(ClassificationVote::new(Label::Defective, p_defective, VoteSource::Model))
        } else {
            Ok(ClassificationVote::new(Label::Acceptable, 1.0 - p_defective, VoteSource::Model))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingBackend, FixedBackend, PanickingBackend, SlowBackend};
    use image::Rgb;

    fn config() -> ModelConfig {
        ModelConfig {
            input_size: 16,
            inference_timeout_ms: 100,
            ..ModelConfig::default()
        }
    }

    fn roi() -> RgbImage {
        RgbImage::from_pixel(20, 20, Rgb([200, 40, 40]))
    }

    #[test]
    fn test_softmax_picks_largest() {
        let vote = interpret_scores(&[2.0, 0.0]).unwrap();
        assert_eq!(vote.label, Label::Acceptable);
        assert!((vote.confidence - 0.880_797).abs() < 1e-4);

        let vote = interpret_scores(&[-1.0, 3.0]).unwrap();
        assert_eq!(vote.label, Label::Defective);
        assert_eq!(vote.source, VoteSource::Model);
    }

    #[test]
    fn test_sigmoid_single_output() {
        let vote = interpret_scores(&[0.0]).unwrap();
        assert_eq!(vote.label, Label::Defective);
        assert!((vote.confidence - 0.5).abs() < 1e-6);

        let vote = interpret_scores(&[-2.0]).unwrap();
        assert_eq!(vote.label, Label::Acceptable);
        assert!(vote.confidence > 0.85);
    }

    #[test]
    fn test_malformed_scores_are_errors() {
        assert!(interpret_scores(&[]).is_err());
        assert!(interpret_scores(&[f32::NAN, 1.0]).is_err());
    }

    #[test]
    fn test_preprocess_layout() {
        let classifier = ModelClassifier::new(Box::new(FixedBackend::new(vec![1.0, 0.0])), &config()).unwrap();
        let tensor = classifier.preprocess(&roi());
        assert_eq!(tensor.len(), 3 * 16 * 16);
        // red plane first: (200/255 - 0.485) / 0.229
        assert!((tensor[0] - 1.3070).abs() < 1e-3);
        // blue plane: (40/255 - 0.406) / 0.225
        assert!((tensor[2 * 256] - (-1.1073)).abs() < 1e-3);
    }

    #[test]
    fn test_classify_with_backend() {
        let classifier = ModelClassifier::new(Box::new(FixedBackend::new(vec![0.0, 4.0])), &config()).unwrap();
        let vote = classifier.classify(&roi());
        assert_eq!(vote.label, Label::Defective);
        assert!(vote.confidence > 0.95);
    }

    #[test]
    fn test_timeout_degrades_to_unknown() {
        let classifier =
            ModelClassifier::new(Box::new(SlowBackend::new(Duration::from_millis(400))), &config()).unwrap();
        assert!(matches!(classifier.predict(&roi()), Err(ScanError::InferenceTimeout(100))));

        let vote = classifier.classify(&roi());
        assert_eq!(vote.label, Label::Unknown);
        assert_eq!(vote.confidence, 0.0);
        assert_eq!(vote.source, VoteSource::Model);
    }

    #[test]
    fn test_backend_failure_degrades_to_unknown() {
        let classifier = ModelClassifier::new(Box::new(FailingBackend), &config()).unwrap();
        assert!(matches!(classifier.predict(&roi()), Err(ScanError::InferenceFailure(_))));
        assert_eq!(classifier.classify(&roi()).label, Label::Unknown);
    }

    #[test]
    fn test_backend_panic_keeps_worker_alive() {
        let classifier = ModelClassifier::new(Box::new(PanickingBackend::new(1)), &config()).unwrap();
        assert_eq!(classifier.classify(&roi()).label, Label::Unknown);
        // second call succeeds once the backend stops panicking
        assert_eq!(classifier.classify(&roi()).label, Label::Acceptable);
    }

    #[test]
    fn test_from_config_without_path() {
        assert!(ModelClassifier::from_config(&ModelConfig::default()).unwrap().is_none());

        let missing = ModelConfig {
            path: Some("does/not/exist.onnx".to_string()),
            ..ModelConfig::default()
        };
        assert!(ModelClassifier::from_config(&missing).unwrap().is_none());
    }
}
