use crate::config::StorageConfig;
use crate::errors::ScanError;
use crate::types::{ArtifactPaths, DetectionRecord, Frame, RoiCandidate};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Saves the original frame, ROI crop, mask and record metadata for manual captures and
/// uploads. Layout under the output directory: `results/`, `masks/`, `metadata/`.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
    jpeg_quality: u8,
    enabled: bool,
}

impl ArtifactWriter {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: PathBuf::from(&config.output_directory),
            jpeg_quality: config.jpeg_quality,
            enabled: config.save_artifacts,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Save images for one detection. Failures are logged and leave the paths `None`.
    pub fn save_images(
        &self,
        frame: &Frame,
        roi: &RoiCandidate,
        timestamp: DateTime<Utc>,
        name_hint: &str,
    ) -> ArtifactPaths {
        if !self.enabled {
            return ArtifactPaths::default();
        }

        let prefix = timestamp.format("%Y%m%d_%H%M%S_%3f").to_string();
        let stem = sanitize_stem(name_hint);
        let results = self.root.join("results");
        let masks = self.root.join("masks");

        let original = results.join(format!("{}_{}.jpg", prefix, stem));
        let original = self
            .write_jpeg(&DynamicImage::ImageRgb8(frame.image().clone()), &original)
            .map(|_| original);

        let roi_path = roi.crop(frame).map(|crop| {
            let path = results.join(format!("{}_roi_{}.jpg", prefix, stem));
            self.write_jpeg(&DynamicImage::ImageRgb8(crop), &path).map(|_| path)
        });

        let mask_path = masks.join(format!("{}_mask_{}.png", prefix, stem));
        let mask = write_png(&roi.mask, &mask_path).map(|_| mask_path);

        ArtifactPaths {
            original: keep_path(original, "original"),
            roi: roi_path.and_then(|r| keep_path(r, "roi")),
            mask: keep_path(mask, "mask"),
        }
    }

    /// Write the record as pretty JSON next to its images.
    pub fn save_metadata(&self, record: &DetectionRecord) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        let dir = self.root.join("metadata");
        let path = dir.join(format!("{}_{}.json", record.timestamp.format("%Y%m%d_%H%M%S_%3f"), record.id));

        let result = fs::create_dir_all(&dir)
            .map_err(|e| ScanError::PersistenceFailure(format!("Failed to create {:?}: {}", dir, e)))
            .and_then(|_| {
                let file = File::create(&path)
                    .map_err(|e| ScanError::PersistenceFailure(format!("Failed to create {:?}: {}", path, e)))?;
                serde_json::to_writer_pretty(BufWriter::new(file), record)
                    .map_err(|e| ScanError::PersistenceFailure(format!("Failed to write {:?}: {}", path, e)))
            });

        match result {
            Ok(()) => Some(path),
            Err(e) => {
                log::warn!("Skipping metadata artifact: {}", e);
                None
            }
        }
    }

    fn write_jpeg(&self, image: &DynamicImage, path: &Path) -> Result<(), ScanError> {
        ensure_parent(path)?;
        let file = File::create(path)
            .map_err(|e| ScanError::PersistenceFailure(format!("Failed to create {:?}: {}", path, e)))?;
        let mut writer = BufWriter::new(file);
        let encoder = JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality);
        image
            .write_with_encoder(encoder)
            .map_err(|e| ScanError::PersistenceFailure(format!("Failed to encode {:?}: {}", path, e)))?;
        writer
            .flush()
            .map_err(|e| ScanError::PersistenceFailure(format!("Failed to write {:?}: {}", path, e)))
    }
}

fn write_png(mask: &image::GrayImage, path: &Path) -> Result<(), ScanError> {
    ensure_parent(path)?;
    mask.save_with_format(path, ImageFormat::Png)
        .map_err(|e| ScanError::PersistenceFailure(format!("Failed to save {:?}: {}", path, e)))
}

fn ensure_parent(path: &Path) -> Result<(), ScanError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ScanError::PersistenceFailure(format!("Failed to create {:?}: {}", parent, e)))?;
    }
    Ok(())
}

fn keep_path(result: Result<PathBuf, ScanError>, what: &str) -> Option<String> {
    match result {
        Ok(path) => Some(path.display().to_string()),
        Err(e) => {
            log::warn!("Skipping {} artifact: {}", what, e);
            None
        }
    }
}

/// File-name-safe stem of an upload name; `capture` when nothing usable remains.
fn sanitize_stem(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "capture".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::testing::synthetic_data::{empty_scene, healthy_fruit_frame};
    use crate::vision::RoiDetector;

    fn writer(root: &Path, enabled: bool) -> ArtifactWriter {
        ArtifactWriter::new(&StorageConfig {
            output_directory: root.display().to_string(),
            save_artifacts: enabled,
            ..StorageConfig::default()
        })
    }

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("apple 1.png"), "apple_1");
        assert_eq!(sanitize_stem("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_stem(""), "capture");
    }

    #[test]
    fn test_saves_all_images_for_valid_roi() {
        let dir = tempfile::tempdir().unwrap();
        let frame = healthy_fruit_frame(1);
        let roi = RoiDetector::new(&DetectionConfig::default()).detect(&frame);

        let paths = writer(dir.path(), true).save_images(&frame, &roi, Utc::now(), "upload.png");
        assert!(Path::new(paths.original.as_deref().unwrap()).exists());
        assert!(Path::new(paths.roi.as_deref().unwrap()).exists());
        assert!(paths.mask.as_deref().unwrap().ends_with(".png"));
    }

    #[test]
    fn test_no_roi_crop_for_empty_scene() {
        let dir = tempfile::tempdir().unwrap();
        let frame = empty_scene(1);
        let roi = RoiDetector::new(&DetectionConfig::default()).detect(&frame);

        let paths = writer(dir.path(), true).save_images(&frame, &roi, Utc::now(), "empty.jpg");
        assert!(paths.original.is_some());
        assert!(paths.roi.is_none());
        assert!(paths.mask.is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_jpeg_write_reports_full_disk() {
        let dir = tempfile::tempdir().unwrap();
        let image = DynamicImage::ImageRgb8(image::RgbImage::new(8, 8));

        // small enough to sit in the buffer until the final flush
        let err = writer(dir.path(), true)
            .write_jpeg(&image, Path::new("/dev/full"))
            .unwrap_err();
        assert!(matches!(err, ScanError::PersistenceFailure(_)));
    }

    #[test]
    fn test_disabled_writer_saves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let frame = healthy_fruit_frame(1);
        let roi = RoiCandidate::empty(frame.width(), frame.height());

        let paths = writer(dir.path(), false).save_images(&frame, &roi, Utc::now(), "x.jpg");
        assert_eq!(paths, ArtifactPaths::default());
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
