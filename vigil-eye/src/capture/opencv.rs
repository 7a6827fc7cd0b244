//! OpenCV-backed USB camera driver

use super::{Backend, CameraDevice, CameraDriver, CameraEnumerator};
use crate::error::{Result, VisionError};
use crate::frame::Frame;
use ::opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{VideoCapture, CAP_ANY, CAP_V4L2},
};
use tracing::{debug, info, warn};

fn api_preference(backend: Backend) -> i32 {
    match backend {
        Backend::V4l2 => CAP_V4L2,
        Backend::Default => CAP_ANY,
    }
}

/// Opens cameras through `cv::VideoCapture`
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvDriver;

impl CameraEnumerator for OpenCvDriver {
    fn list_available(&self, max_devices: u32) -> Vec<u32> {
        let mut available = Vec::new();
        for index in 0..max_devices {
            match VideoCapture::new(index as i32, CAP_ANY) {
                Ok(mut capture) => {
                    if capture.is_opened().unwrap_or(false) {
                        debug!("Found camera at index {}", index);
                        available.push(index);
                    }
                    let _ = capture.release();
                }
                Err(e) => warn!("Probing camera index {} failed: {}", index, e),
            }
        }
        info!("Available camera indices: {:?}", available);
        available
    }
}

impl CameraDriver for OpenCvDriver {
    fn open(&self, camera_index: u32, backend: Backend) -> Result<Box<dyn CameraDevice>> {
        let capture = VideoCapture::new(camera_index as i32, api_preference(backend))
            .map_err(|e| VisionError::Camera(format!("Failed to open camera {}: {}", camera_index, e)))?;
        Ok(Box::new(OpenCvDevice { capture, camera_index }))
    }
}

struct OpenCvDevice {
    capture: VideoCapture,
    camera_index: u32,
}

impl CameraDevice for OpenCvDevice {
    fn is_opened(&self) -> bool {
        self.capture.is_opened().unwrap_or(false)
    }

    fn read(&mut self) -> Result<Frame> {
        let mut bgr = Mat::default();
        let grabbed = self.capture.read(&mut bgr)?;
        if !grabbed || bgr.rows() == 0 {
            return Err(VisionError::Camera(format!(
                "Failed to read frame from camera {}",
                self.camera_index
            )));
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
        let pixels = rgb.data_bytes()?.to_vec();
        Frame::from_rgb(rgb.cols() as u32, rgb.rows() as u32, pixels)
    }

    fn release(&mut self) {
        if let Err(e) = self.capture.release() {
            warn!("Failed to release camera {}: {}", self.camera_index, e);
        }
    }
}
