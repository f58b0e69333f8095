use thiserror::Error;

/// Errors surfaced by the inspection core.
///
/// Inference problems are normally absorbed by the pipeline (the frame degrades to
/// `unknown`); the `Inference*` variants only escape from the low-level model API.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Camera device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Cannot enable live mode: {0}")]
    CannotEnableLive(String),
    #[error("Inference timed out after {0} ms")]
    InferenceTimeout(u64),
    #[error("Inference failure: {0}")]
    InferenceFailure(String),
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("No frame available: {0}")]
    NoFrameAvailable(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScanError {
    /// Whether the caller may retry the same operation and expect a different outcome.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScanError::DeviceUnavailable(_)
                | ScanError::InferenceTimeout(_)
                | ScanError::PersistenceFailure(_)
                | ScanError::NoFrameAvailable(_)
        )
    }
}
