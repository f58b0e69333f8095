use super::blocking;
use crate::lifecycle::CameraLifecycle;
use crate::types::DetectionRecord;

/// Maximum accepted upload size.
pub const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Classify one uploaded image and record the result.
pub async fn detect_image(
    lifecycle: &CameraLifecycle,
    bytes: Vec<u8>,
    filename: String,
) -> Result<DetectionRecord, String> {
    if bytes.is_empty() {
        return Err("Invalid image: empty upload".to_string());
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(format!(
            "Invalid image: upload of {} bytes exceeds {} bytes",
            bytes.len(),
            MAX_UPLOAD_BYTES
        ));
    }

    log::info!("Detecting uploaded image {} ({} bytes)", filename, bytes.len());
    blocking(lifecycle, move |lc| lc.detect_image(&bytes, &filename)).await
}
