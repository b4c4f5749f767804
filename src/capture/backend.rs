//! Camera device-open strategies
//!
//! Opening a capture device is platform- and driver-dependent, so the
//! worker tries a ranked list of [`CameraBackend`] strategies and adopts
//! the first that succeeds. Backends are stateless factories; the device
//! handle they produce is exclusive to one worker.

use image::RgbImage;

use super::CaptureError;

/// An open camera device handle
///
/// Exactly one `FrameSource` worker holds a device at a time. Dropping the
/// handle releases the device.
pub trait CameraDevice: Send {
    /// Blocking read of one frame; may block up to the driver frame interval
    fn read_frame(&mut self) -> Result<RgbImage, CaptureError>;
}

/// A strategy for opening a camera device
pub trait CameraBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Try to open the device at `index`
    fn open(&self, index: u32) -> Result<Box<dyn CameraDevice>, CaptureError>;
}

/// The ranked backend list compiled into this build
pub fn default_backends() -> Vec<Box<dyn CameraBackend>> {
    #[cfg(feature = "camera-opencv")]
    {
        super::opencv::backends()
    }
    #[cfg(not(feature = "camera-opencv"))]
    {
        Vec::new()
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted camera fakes for lifecycle tests

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// One step of a scripted device's read behavior
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ReadStep {
        /// Produce a frame
        Frame,
        /// Fail with a transient read error
        FailRead,
        /// Block for a long time before producing a frame (stuck driver)
        Hang,
    }

    /// Backend whose devices follow a fixed read script, repeating the
    /// final step forever; counts successful opens.
    pub struct ScriptedBackend {
        backend_name: &'static str,
        fail_open: bool,
        script: Vec<ReadStep>,
        frame_size: (u32, u32),
        pub opens: Arc<AtomicUsize>,
    }

    impl ScriptedBackend {
        /// A backend serving frames indefinitely
        pub fn serving_frames() -> Self {
            Self::with_script(vec![ReadStep::Frame])
        }

        /// A backend whose open always fails
        pub fn failing_open() -> Self {
            Self {
                backend_name: "fake-broken",
                fail_open: true,
                script: Vec::new(),
                frame_size: (8, 8),
                opens: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// A backend with an explicit read script
        pub fn with_script(script: Vec<ReadStep>) -> Self {
            Self {
                backend_name: "fake",
                fail_open: false,
                script,
                frame_size: (8, 8),
                opens: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn named(mut self, name: &'static str) -> Self {
            self.backend_name = name;
            self
        }

        /// Dimensions of the frames the fake device produces
        pub fn frame_size(mut self, width: u32, height: u32) -> Self {
            self.frame_size = (width, height);
            self
        }

        /// Shared handle to the open counter
        pub fn open_counter(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.opens)
        }
    }

    impl CameraBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            self.backend_name
        }

        fn open(&self, index: u32) -> Result<Box<dyn CameraDevice>, CaptureError> {
            if self.fail_open {
                return Err(CaptureError::Open {
                    index,
                    reason: "scripted open failure".to_string(),
                });
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedDevice {
                script: self.script.clone(),
                frame_size: self.frame_size,
                position: 0,
            }))
        }
    }

    struct ScriptedDevice {
        script: Vec<ReadStep>,
        frame_size: (u32, u32),
        position: usize,
    }

    impl CameraDevice for ScriptedDevice {
        fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
            let step = self
                .script
                .get(self.position)
                .or_else(|| self.script.last())
                .copied()
                .unwrap_or(ReadStep::FailRead);
            if self.position < self.script.len() {
                self.position += 1;
            }

            match step {
                ReadStep::Frame => Ok(RgbImage::new(self.frame_size.0, self.frame_size.1)),
                ReadStep::FailRead => {
                    Err(CaptureError::Read("scripted read failure".to_string()))
                }
                ReadStep::Hang => {
                    std::thread::sleep(std::time::Duration::from_secs(2));
                    Ok(RgbImage::new(self.frame_size.0, self.frame_size.1))
                }
            }
        }
    }
}
