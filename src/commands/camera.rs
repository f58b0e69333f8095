use super::blocking;
use crate::lifecycle::CameraLifecycle;
use crate::types::{CameraStatus, DetectionRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: CameraStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveResponse {
    pub is_live: bool,
}

/// Open a camera and start the processing loop; the configured default when `index` is `None`.
pub async fn start_camera(lifecycle: &CameraLifecycle, index: Option<u32>) -> Result<StatusResponse, String> {
    let index = index.unwrap_or(lifecycle.config().camera.default_index);
    log::info!("Starting camera {}", index);

    match blocking(lifecycle, move |lc| lc.start(index)).await {
        Ok(status) => Ok(StatusResponse { status }),
        Err(e) => {
            log::error!("Failed to start camera {}: {}", index, e);
            Err(format!("Failed to start camera: {}", e))
        }
    }
}

pub async fn stop_camera(lifecycle: &CameraLifecycle) -> Result<StatusResponse, String> {
    let status = blocking(lifecycle, |lc| lc.stop()).await?;
    Ok(StatusResponse { status })
}

pub async fn toggle_live(lifecycle: &CameraLifecycle) -> Result<LiveResponse, String> {
    match blocking(lifecycle, |lc| lc.toggle_live()).await {
        Ok(is_live) => Ok(LiveResponse { is_live }),
        Err(e) => {
            log::error!("Toggle live failed: {}", e);
            Err(e)
        }
    }
}

/// Manually record the current verdict, starting the camera if needed.
pub async fn capture(lifecycle: &CameraLifecycle) -> Result<DetectionRecord, String> {
    match blocking(lifecycle, |lc| lc.capture_once()).await {
        Ok(record) => {
            log::info!("Captured {} ({:.2})", record.label, record.confidence);
            Ok(record)
        }
        Err(e) => {
            log::error!("Capture failed: {}", e);
            Err(format!("Failed to capture frame: {}", e))
        }
    }
}

pub async fn camera_status(lifecycle: &CameraLifecycle) -> Result<CameraStatus, String> {
    Ok(lifecycle.status())
}

/// JPEG bytes of the newest annotated frame.
pub async fn get_latest_annotated_frame(lifecycle: &CameraLifecycle) -> Result<Vec<u8>, String> {
    lifecycle
        .latest_annotated_frame()
        .map(|jpeg| jpeg.to_vec())
        .map_err(|e| e.to_string())
}
