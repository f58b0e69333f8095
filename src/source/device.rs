use super::{FrameClock, FrameSource, SourceOpener, SourceRequest};
use crate::errors::ScanError;
use crate::types::Frame;
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    CallbackCamera,
};

/// Opens physical cameras through nokhwa's native backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NokhwaOpener;

impl SourceOpener for NokhwaOpener {
    fn open(&self, request: &SourceRequest) -> Result<Box<dyn FrameSource>, ScanError> {
        let source = DeviceSource::open(request)?;
        Ok(Box::new(source))
    }
}

/// Camera-backed frame source
pub struct DeviceSource {
    camera: CallbackCamera,
    index: u32,
    clock: FrameClock,
}

impl DeviceSource {
    pub fn open(request: &SourceRequest) -> Result<Self, ScanError> {
        let wanted = CameraFormat::new(
            Resolution::new(request.width, request.height),
            FrameFormat::MJPEG,
            request.fps,
        );
        let requested_format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

        let mut camera = CallbackCamera::new(CameraIndex::Index(request.index), requested_format, |_| {})
            .map_err(|e| {
                ScanError::DeviceUnavailable(format!("Failed to initialize camera {}: {}", request.index, e))
            })?;

        camera.open_stream().map_err(|e| {
            ScanError::DeviceUnavailable(format!("Failed to start stream on camera {}: {}", request.index, e))
        })?;

        log::info!(
            "Opened camera {} ({}x{} @ {} fps requested)",
            request.index,
            request.width,
            request.height,
            request.fps
        );

        Ok(Self {
            camera,
            index: request.index,
            clock: FrameClock::new(),
        })
    }
}

impl FrameSource for DeviceSource {
    fn read_frame(&mut self) -> Result<Frame, ScanError> {
        let buffer = self
            .camera
            .poll_frame()
            .map_err(|e| ScanError::DeviceUnavailable(format!("Failed to capture frame: {}", e)))?;

        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| ScanError::InvalidImage(format!("Failed to decode camera frame: {}", e)))?;

        let (width, height) = (decoded.width(), decoded.height());
        let (sequence, timestamp_us) = self.clock.tick();
        Frame::from_rgb(sequence, timestamp_us, width, height, decoded.into_raw())
            .ok_or_else(|| ScanError::InvalidImage(format!("Camera returned a malformed {}x{} frame", width, height)))
    }

    fn is_open(&self) -> bool {
        self.camera.is_stream_open().unwrap_or(false)
    }

    fn describe(&self) -> String {
        format!("camera {}", self.index)
    }
}

impl Drop for DeviceSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            log::warn!("Failed to stop stream on camera {}: {}", self.index, e);
        }
        log::debug!("Released camera {}", self.index);
    }
}

// The callback camera keeps its backend behind its own mutex; the loop thread is the only user.
unsafe impl Send for DeviceSource {}
