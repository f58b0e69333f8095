use super::{FrameClock, FrameSource, SourceOpener, SourceRequest};
use crate::errors::ScanError;
use crate::types::Frame;
use image::RgbImage;
use std::path::Path;
use std::time::Duration;

/// Decode an uploaded image (any format the `image` crate recognises) into RGB8.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<RgbImage, ScanError> {
    if bytes.is_empty() {
        return Err(ScanError::InvalidImage("empty upload".to_string()));
    }
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| ScanError::InvalidImage(format!("Failed to decode image: {}", e)))?;
    let rgb = decoded.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(ScanError::InvalidImage("image has no pixels".to_string()));
    }
    Ok(rgb)
}

/// Replays a single image as a frame stream, paced to the requested rate.
pub struct StillImageSource {
    image: RgbImage,
    interval: Duration,
    clock: FrameClock,
    label: String,
}

impl StillImageSource {
    pub fn new(image: RgbImage, fps: u32, label: impl Into<String>) -> Self {
        Self {
            image,
            interval: Duration::from_millis(1000 / u64::from(fps.max(1))),
            clock: FrameClock::new(),
            label: label.into(),
        }
    }
}

impl FrameSource for StillImageSource {
    fn read_frame(&mut self) -> Result<Frame, ScanError> {
        std::thread::sleep(self.interval);
        let (sequence, timestamp_us) = self.clock.tick();
        Ok(Frame::from_image(sequence, timestamp_us, self.image.clone()))
    }

    fn is_open(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("still image {}", self.label)
    }
}

/// Opener that serves one image file regardless of the requested index.
#[derive(Debug, Clone)]
pub struct StillImageOpener {
    image: RgbImage,
    label: String,
}

impl StillImageOpener {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| ScanError::InvalidImage(format!("Failed to read {:?}: {}", path, e)))?;
        Ok(Self {
            image: decode_image_bytes(&bytes)?,
            label: path.display().to_string(),
        })
    }
}

impl SourceOpener for StillImageOpener {
    fn open(&self, request: &SourceRequest) -> Result<Box<dyn FrameSource>, ScanError> {
        Ok(Box::new(StillImageSource::new(self.image.clone(), request.fps, self.label.clone())))
    }
}
