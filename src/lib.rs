//! FruitScan: real-time fruit quality inspection from a camera feed
//!
//! Each frame goes through color/shape segmentation of the fruit, a surface-defect
//! heuristic and an optional learned classifier. The two votes are fused, smoothed over
//! a short window and, in live mode, persisted whenever the verdict settles.
//!
//! # Features
//! - Camera lifecycle with idempotent start, bounded stop and crash recovery
//! - HSV + morphology ROI detection with circularity sanity checks
//! - Optional ONNX classifier (`onnx` feature) with a bounded inference timeout
//! - Majority-vote + EMA temporal smoothing
//! - Crash-safe JSON statistics with capped history
//! - Annotated JPEG preview frames
//!
//! # Usage
//! ```rust,ignore
//! use fruitscan::{CameraLifecycle, FruitScanConfig};
//!
//! let lifecycle = CameraLifecycle::from_config(FruitScanConfig::load_or_default())?;
//! lifecycle.start(0)?;
//! lifecycle.toggle_live()?;
//! let record = lifecycle.capture_once()?;
//! println!("{} ({:.2})", record.label, record.confidence);
//! lifecycle.stop()?;
//! ```
pub mod commands;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod render;
pub mod smoothing;
pub mod source;
pub mod stats;
pub mod types;
pub mod vision;

// Testing utilities - synthetic scenes and scripted cameras for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::FruitScanConfig;
pub use errors::ScanError;
pub use lifecycle::{CameraLifecycle, HealthReport};
pub use render::StreamRenderer;
pub use smoothing::TemporalSmoother;
pub use stats::{StatsSnapshot, StatsStore, StatsSummary};
pub use types::{
    CameraState, CameraStatus, ClassificationVote, DetectionRecord, Frame, Label, RecordOrigin, VoteSource,
};
pub use vision::{FramePipeline, InferenceMode};

/// Initialize logging for the inspection system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "fruitscan=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        onnx_enabled: cfg!(feature = "onnx"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub onnx_enabled: bool,
}
