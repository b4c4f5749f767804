//! OpenCV videoio camera backends
//!
//! The ranked preference list mirrors what works best in the field:
//! DirectShow, then Media Foundation (both Windows), then whatever the
//! OpenCV build autodetects (V4L2 on Linux).

use image::RgbImage;
use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};

use super::backend::{CameraBackend, CameraDevice};
use super::CaptureError;

/// The ranked OpenCV backend list
pub fn backends() -> Vec<Box<dyn CameraBackend>> {
    vec![
        Box::new(OpenCvBackend {
            api: videoio::CAP_DSHOW,
            backend_name: "opencv-dshow",
        }),
        Box::new(OpenCvBackend {
            api: videoio::CAP_MSMF,
            backend_name: "opencv-msmf",
        }),
        Box::new(OpenCvBackend {
            api: videoio::CAP_ANY,
            backend_name: "opencv-any",
        }),
    ]
}

/// One OpenCV capture API preference
struct OpenCvBackend {
    api: i32,
    backend_name: &'static str,
}

impl CameraBackend for OpenCvBackend {
    fn name(&self) -> &'static str {
        self.backend_name
    }

    fn open(&self, index: u32) -> Result<Box<dyn CameraDevice>, CaptureError> {
        let capture = VideoCapture::new(index as i32, self.api).map_err(|e| CaptureError::Open {
            index,
            reason: e.to_string(),
        })?;

        let opened = capture.is_opened().map_err(|e| CaptureError::Open {
            index,
            reason: e.to_string(),
        })?;
        if !opened {
            return Err(CaptureError::Open {
                index,
                reason: format!("{} reports device not opened", self.backend_name),
            });
        }

        Ok(Box::new(OpenCvDevice { capture }))
    }
}

/// An open VideoCapture handle; released on drop
struct OpenCvDevice {
    capture: VideoCapture,
}

impl CameraDevice for OpenCvDevice {
    fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
        let mut mat = Mat::default();
        let got_frame = self
            .capture
            .read(&mut mat)
            .map_err(|e| CaptureError::Read(e.to_string()))?;
        if !got_frame {
            return Err(CaptureError::Read("device returned no frame".to_string()));
        }
        mat_to_rgb(&mat)
    }
}

/// Copy a BGR Mat into an owned RGB buffer
fn mat_to_rgb(mat: &Mat) -> Result<RgbImage, CaptureError> {
    let rows = mat.rows();
    let cols = mat.cols();
    if rows <= 0 || cols <= 0 {
        return Err(CaptureError::Read("empty frame".to_string()));
    }

    let data = mat
        .data_bytes()
        .map_err(|e| CaptureError::Read(e.to_string()))?;

    // BGR to RGB
    let mut rgb = data.to_vec();
    for pixel in rgb.chunks_mut(3) {
        pixel.swap(0, 2);
    }

    RgbImage::from_raw(cols as u32, rows as u32, rgb)
        .ok_or_else(|| CaptureError::Read("unexpected frame buffer size".to_string()))
}
