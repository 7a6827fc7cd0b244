//! Camera capture: device abstraction, resilient sessions and frame pacing

mod session;
mod ticker;

#[cfg(feature = "opencv")]
pub mod opencv;

pub use session::CaptureSession;
pub use ticker::{sleep_unless_stopped, Ticker};

use crate::error::Result;
use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// OS/driver-level camera access method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    /// Video4Linux2, the native backend on Linux boards
    V4l2,
    /// Whatever the driver picks when no backend is requested
    Default,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::V4l2 => write!(f, "V4L2"),
            Backend::Default => write!(f, "Default"),
        }
    }
}

/// Releases a device from a thread other than the one reading it.
///
/// Releasing must make a blocked `read` return, and must be idempotent with
/// `CameraDevice::release`.
pub trait ReleaseHandle: Send + Sync {
    fn release(&self);
}

/// An opened camera device
pub trait CameraDevice: Send {
    fn is_opened(&self) -> bool;

    /// Read the next frame, blocking until the device delivers one or fails
    fn read(&mut self) -> Result<Frame>;

    /// Release the underlying device. Must tolerate repeated calls.
    fn release(&mut self);

    /// Handle that can release the device while a `read` is in flight.
    /// Without one, a stuck read keeps the device until the read returns.
    fn release_handle(&self) -> Option<Arc<dyn ReleaseHandle>> {
        None
    }
}

/// Lists device indices that can currently be opened
pub trait CameraEnumerator: Send + Sync {
    fn list_available(&self, max_devices: u32) -> Vec<u32>;
}

/// Opens camera devices by index through a given backend
pub trait CameraDriver: CameraEnumerator {
    fn open(&self, camera_index: u32, backend: Backend) -> Result<Box<dyn CameraDevice>>;
}
