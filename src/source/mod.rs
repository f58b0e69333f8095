//! Frame acquisition.
//!
//! A [`SourceOpener`] turns a device request into an open [`FrameSource`]. The live
//! loop owns exactly one source at a time; the lifecycle releases it by dropping it.

pub mod device;
pub mod still;

use crate::errors::ScanError;
use crate::types::Frame;

pub use device::{DeviceSource, NokhwaOpener};
pub use still::{decode_image_bytes, StillImageOpener, StillImageSource};

/// Parameters used to open a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRequest {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// An open stream of frames.
pub trait FrameSource: Send {
    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<Frame, ScanError>;

    /// Whether the underlying handle is still usable.
    fn is_open(&self) -> bool;

    fn describe(&self) -> String;
}

/// Factory for frame sources, injected into the lifecycle so tests can run without hardware.
pub trait SourceOpener: Send + Sync {
    fn open(&self, request: &SourceRequest) -> Result<Box<dyn FrameSource>, ScanError>;
}

/// Monotonic sequence and timestamp bookkeeping shared by source implementations.
#[derive(Debug)]
pub(crate) struct FrameClock {
    started: std::time::Instant,
    next_sequence: u64,
}

impl FrameClock {
    pub(crate) fn new() -> Self {
        Self {
            started: std::time::Instant::now(),
            next_sequence: 1,
        }
    }

    /// Returns `(sequence, timestamp_us)` for the next frame.
    pub(crate) fn tick(&mut self) -> (u64, u64) {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(1);
        (sequence, self.started.elapsed().as_micros() as u64)
    }
}
