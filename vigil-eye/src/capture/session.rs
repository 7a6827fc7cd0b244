//! A single opened camera with backend fallback and bounded retries

use super::{sleep_unless_stopped, Backend, CameraDevice, CameraDriver, ReleaseHandle};
use crate::config::CaptureConfig;
use crate::error::{Result, VisionError};
use crate::frame::Frame;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Owns one opened camera device. Never shared between workers.
pub struct CaptureSession {
    camera_index: u32,
    backend: Backend,
    attempts: u32,
    device: Option<Box<dyn CameraDevice>>,
    release_handle: Option<Arc<dyn ReleaseHandle>>,
}

impl CaptureSession {
    /// Open `camera_index`, trying each configured backend in order.
    ///
    /// Every attempt must open the device and read a test frame before it is
    /// accepted. The first success short-circuits the remaining attempts and
    /// backends. Raising `stop` abandons the retry loop between attempts.
    pub fn open(
        driver: &dyn CameraDriver,
        camera_index: u32,
        config: &CaptureConfig,
        stop: &AtomicBool,
    ) -> Result<Self> {
        let total_backends = config.backends.len();
        for (backend_pos, &backend) in config.backends.iter().enumerate() {
            info!(camera = camera_index, %backend, "Trying to open camera");
            for attempt in 1..=config.attempts_per_backend {
                match Self::try_open(driver, camera_index, backend) {
                    Ok(device) => {
                        info!(camera = camera_index, %backend, attempt, "Camera opened");
                        let release_handle = device.release_handle();
                        return Ok(Self {
                            camera_index,
                            backend,
                            attempts: attempt,
                            device: Some(device),
                            release_handle,
                        });
                    }
                    Err(e) => {
                        warn!(
                            camera = camera_index,
                            %backend,
                            "Open attempt {}/{} failed: {}",
                            attempt,
                            config.attempts_per_backend,
                            e
                        );
                    }
                }

                let last_try = backend_pos + 1 == total_backends
                    && attempt == config.attempts_per_backend;
                if !last_try && !sleep_unless_stopped(config.retry_delay(), stop) {
                    return Err(VisionError::Camera(format!(
                        "Opening camera {} was cancelled",
                        camera_index
                    )));
                }
            }
        }

        error!(camera = camera_index, "Failed to open camera with any backend");
        Err(VisionError::Camera(format!(
            "Failed to open camera {} with any backend",
            camera_index
        )))
    }

    fn try_open(
        driver: &dyn CameraDriver,
        camera_index: u32,
        backend: Backend,
    ) -> Result<Box<dyn CameraDevice>> {
        let mut device = driver.open(camera_index, backend)?;
        if !device.is_opened() {
            device.release();
            return Err(VisionError::Camera(format!("Camera {} failed to open", camera_index)));
        }
        match device.read() {
            Ok(_) => Ok(device),
            Err(e) => {
                device.release();
                Err(VisionError::Camera(format!(
                    "Camera {} opened but test frame failed: {}",
                    camera_index, e
                )))
            }
        }
    }

    pub fn camera_index(&self) -> u32 {
        self.camera_index
    }

    /// Backend that produced the working device
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Attempt number (on the winning backend) that succeeded
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Cross-thread release handle, if the device offers one
    pub fn release_handle(&self) -> Option<Arc<dyn ReleaseHandle>> {
        self.release_handle.clone()
    }

    pub fn is_open(&self) -> bool {
        self.device.as_ref().map(|d| d.is_opened()).unwrap_or(false)
    }

    pub fn read(&mut self) -> Result<Frame> {
        match self.device.as_mut() {
            Some(device) => device.read(),
            None => Err(VisionError::Camera(format!(
                "Camera {} is released",
                self.camera_index
            ))),
        }
    }

    /// Release the device. Returns `true` if a device was actually released;
    /// repeated calls are no-ops.
    pub fn release(&mut self) -> bool {
        match self.device.take() {
            Some(mut device) => {
                info!(camera = self.camera_index, "Releasing camera");
                device.release();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("camera_index", &self.camera_index)
            .field("backend", &self.backend)
            .field("attempts", &self.attempts)
            .field("open", &self.is_open())
            .field("release_handle", &self.release_handle.is_some())
            .finish()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}
