//! vigil-eye: multi-camera capture and detection orchestration
//!
//! Runs one worker thread per live camera. Each worker opens its device with
//! backend fallback, reads frames, runs every Nth frame through a shared
//! detection model and persists the hits, reconnecting when the device
//! misbehaves. A registry starts and stops workers on request, throttles
//! frame rates as more cameras run, and a reaper evicts idle cameras.

pub mod capture;
pub mod config;
pub mod error;
pub mod frame;
pub mod models;
pub mod processing;
pub mod reaper;
pub mod registry;
pub mod worker;

pub use capture::{
    Backend, CameraDevice, CameraDriver, CameraEnumerator, CaptureSession, ReleaseHandle,
};
pub use config::{CaptureConfig, OrchestratorConfig, RealtimeConfig};
pub use error::{Result, VisionError};
pub use frame::{DetectedObject, Frame, ObjectType};
pub use models::{InferenceModel, ModelHandle, ModelRegistry, ModelSource};
pub use processing::{DiskPersistence, FramePipeline, Persistence};
pub use reaper::{InactivityReaper, ReaperHandle};
pub use registry::{CameraStatus, WorkerRegistry};
pub use worker::{CameraWorker, WorkerServices, WorkerSettings, WorkerState};
