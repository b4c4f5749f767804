//! Frame data structures for captured camera content

use image::RgbImage;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// A captured frame from the camera
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// RGB pixel data
    pub image: RgbImage,
    /// Monotonic capture sequence number within one session
    pub sequence: u64,
    /// Timestamp when the frame was captured
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            timestamp: Instant::now(),
        }
    }

    /// Frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

/// Single-writer / multi-reader latest-frame cell
///
/// Latest-frame-wins delivery: a new frame overwrites an undrained previous
/// one rather than queueing. Readers get an `Arc` snapshot, so a reader
/// holding an old frame never blocks or races the writer.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Arc<CapturedFrame>>>,
}

impl FrameSlot {
    /// Overwrite the slot with a new frame
    pub fn publish(&self, frame: CapturedFrame) {
        *self.latest.lock() = Some(Arc::new(frame));
    }

    /// Atomically read the most recent frame, if any
    pub fn snapshot(&self) -> Option<Arc<CapturedFrame>> {
        self.latest.lock().clone()
    }

    /// Drop the held frame
    pub fn clear(&self) {
        *self.latest.lock() = None;
    }
}
