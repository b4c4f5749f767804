//! Camera capture layer
//!
//! Owns the physical camera: device-open strategies, the acquisition
//! worker thread and latest-frame-wins delivery to the rest of the
//! pipeline. The interactive side never performs a blocking device read.

pub mod backend;
pub mod frame;
#[cfg(feature = "camera-opencv")]
pub mod opencv;
pub mod source;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use backend::{CameraBackend, CameraDevice};
pub use frame::{CapturedFrame, FrameSlot};
pub use source::{CameraEvent, CameraState, FrameSource};

/// Capture failure taxonomy
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device could not be opened (session-fatal for the attempt)
    #[error("failed to open camera {index}: {reason}")]
    Open { index: u32, reason: String },

    /// A single frame read failed (transient, retried by the worker)
    #[error("frame read failed: {0}")]
    Read(String),

    /// The device went away mid-session (session-fatal)
    #[error("camera disconnected: {0}")]
    Disconnected(String),
}

/// Camera acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Camera index to open by default
    pub camera_index: u32,
    /// Frames read and discarded after open, before delivery starts
    pub warmup_frames: u32,
    /// Pause between successful reads in milliseconds
    pub frame_interval_ms: u64,
    /// Consecutive read failures tolerated before the session is ended
    pub max_read_retries: u32,
    /// Pause after a transient read failure in milliseconds
    pub retry_backoff_ms: u64,
    /// How long `stop` waits for the worker before abandoning it
    pub stop_timeout_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            camera_index: 0,
            warmup_frames: 5,
            frame_interval_ms: 30,
            max_read_retries: 5,
            retry_backoff_ms: 100,
            stop_timeout_ms: 1500,
        }
    }
}
