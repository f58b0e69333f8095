//! Configuration management for fruitscan
//!
//! Provides loading, saving and validation of camera, detection, model, smoothing and
//! storage settings. Files are TOML; `load_layered` additionally merges
//! `FRUITSCAN__<SECTION>__<KEY>` environment overrides on top of the file.

use crate::errors::ScanError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FruitScanConfig {
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub model: ModelConfig,
    pub smoothing: SmoothingConfig,
    pub storage: StorageConfig,
}

/// Camera acquisition and lifecycle timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device index used when a control operation starts the camera implicitly
    pub default_index: u32,
    /// Requested resolution [width, height]
    pub resolution: [u32; 2],
    /// Target processing rate of the background loop
    pub target_fps: u32,
    /// Pause before opening a device so the OS can release a previous handle
    pub settle_delay_ms: u64,
    /// Delay before the single open retry
    pub open_retry_delay_ms: u64,
    /// Bound on joining the processing loop during stop
    pub stop_timeout_ms: u64,
    /// How long a capture waits for the first frame after an implicit start
    pub first_frame_timeout_ms: u64,
}

/// ROI segmentation, heuristic and fusion thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum pixel area for a region to count as an object
    pub min_roi_area: u32,
    /// Minimum circularity (4*pi*area/perimeter^2)
    pub circularity_min: f32,
    /// Padding added around the bounding box before cropping
    pub roi_padding: u32,
    /// HSV thresholds on the OpenCV 0-255 scale
    pub saturation_min: u8,
    pub value_min: u8,
    pub value_max: u8,
    /// Gray level at or below which a pixel counts as a dark blemish
    pub dark_threshold: u8,
    pub dark_ratio_weight: f32,
    /// Laplacian variance below which the surface is considered abnormally smooth
    pub texture_variance_min: f64,
    pub texture_penalty: f32,
    /// Heuristic score at or above which the ROI is labelled defective
    pub defect_score_threshold: f32,
    /// Heuristic confidence above which it overrides a disagreeing model
    pub heuristic_trust_threshold: f32,
    /// Run the model on every Nth frame of the live loop
    pub model_every_n_frames: u32,
    /// Tag recorded as the fruit type of detected objects
    pub fruit_type: String,
}

/// Trained model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the model file; heuristic-only when unset
    pub path: Option<String>,
    /// Square input edge expected by the model
    pub input_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub inference_timeout_ms: u64,
}

/// Temporal smoothing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub window_size: usize,
    pub ema_alpha: f32,
}

/// Persistence and artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub stats_path: String,
    pub output_directory: String,
    pub save_artifacts: bool,
    pub history_limit: usize,
    /// JPEG quality (1-100) for rendered frames and saved artifacts
    pub jpeg_quality: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            default_index: 0,
            resolution: [1280, 720],
            target_fps: 30,
            settle_delay_ms: 500,
            open_retry_delay_ms: 250,
            stop_timeout_ms: 2000,
            first_frame_timeout_ms: 3000,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_roi_area: 1500,
            circularity_min: 0.02,
            roi_padding: 10,
            saturation_min: 35,
            value_min: 20,
            value_max: 245,
            dark_threshold: 60,
            dark_ratio_weight: 4.0,
            texture_variance_min: 50.0,
            texture_penalty: 0.3,
            defect_score_threshold: 0.4,
            heuristic_trust_threshold: 0.9,
            model_every_n_frames: 3,
            fruit_type: "Apple".to_string(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            input_size: 224,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            inference_timeout_ms: 500,
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            ema_alpha: 0.5,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            stats_path: "detection_stats.json".to_string(),
            output_directory: "./captures".to_string(),
            save_artifacts: true,
            history_limit: 1000,
            jpeg_quality: 85,
        }
    }
}

impl FruitScanConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScanError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ScanError::Config(format!("Failed to read config file: {}", e)))?;

        let config: FruitScanConfig = toml::from_str(&contents)
            .map_err(|e| ScanError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Merge defaults, the TOML file at `path` (optional) and `FRUITSCAN__*` environment overrides
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, ScanError> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| ScanError::Config(format!("Failed to seed defaults: {}", e)))?;

        let layered = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("FRUITSCAN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ScanError::Config(format!("Failed to build layered config: {}", e)))?;

        layered
            .try_deserialize()
            .map_err(|e| ScanError::Config(format!("Failed to deserialize layered config: {}", e)))
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ScanError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| ScanError::Config(format!("Failed to create config directory: {}", e)))?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ScanError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| ScanError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("fruitscan.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_layered(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        let [width, height] = self.camera.resolution;
        if width == 0 || height == 0 {
            return Err("Invalid camera resolution".to_string());
        }
        if self.camera.target_fps == 0 || self.camera.target_fps > 240 {
            return Err("Invalid target FPS (must be 1-240)".to_string());
        }

        let d = &self.detection;
        if d.min_roi_area == 0 {
            return Err("Minimum ROI area must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&d.circularity_min) {
            return Err("Circularity minimum must be between 0.0 and 1.0".to_string());
        }
        if d.value_min >= d.value_max {
            return Err("HSV value_min must be below value_max".to_string());
        }
        if !(0.0..=1.0).contains(&d.defect_score_threshold) {
            return Err("Defect score threshold must be between 0.0 and 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&d.heuristic_trust_threshold) {
            return Err("Heuristic trust threshold must be between 0.0 and 1.0".to_string());
        }
        if d.model_every_n_frames == 0 {
            return Err("model_every_n_frames must be at least 1".to_string());
        }

        if self.model.input_size < 8 {
            return Err("Model input size must be at least 8".to_string());
        }
        if self.model.std.iter().any(|s| *s <= 0.0) {
            return Err("Model normalization std must be positive".to_string());
        }
        if self.model.inference_timeout_ms == 0 {
            return Err("Inference timeout must be positive".to_string());
        }

        if self.smoothing.window_size == 0 || self.smoothing.window_size > 64 {
            return Err("Smoothing window must be between 1 and 64".to_string());
        }
        if !(self.smoothing.ema_alpha > 0.0 && self.smoothing.ema_alpha <= 1.0) {
            return Err("EMA alpha must be in (0.0, 1.0]".to_string());
        }

        if self.storage.history_limit == 0 {
            return Err("History limit must be positive".to_string());
        }
        if self.storage.jpeg_quality == 0 || self.storage.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }

        Ok(())
    }
}
