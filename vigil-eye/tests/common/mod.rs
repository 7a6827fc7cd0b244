//! Simulated cameras and models shared by the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};
use vigil_eye::processing::BoxAnnotator;
use vigil_eye::{
    Backend, CameraDevice, CameraDriver, CameraEnumerator, DetectedObject, Frame, InferenceModel,
    ModelRegistry, ModelSource, OrchestratorConfig, Persistence, ReleaseHandle, Result,
    VisionError, WorkerServices, WorkerState,
};

/// Scripted camera driver. Open and read outcomes are popped from queues;
/// an empty queue means success.
#[derive(Default)]
pub struct SimDriver {
    available: Vec<u32>,
    opens: Mutex<VecDeque<bool>>,
    reads: Arc<Mutex<VecDeque<bool>>>,
    stalled: Arc<AtomicBool>,
    always_fail_open: bool,
    no_release_handle: bool,
    open_calls: Mutex<Vec<(u32, Backend)>>,
    releases: Arc<AtomicUsize>,
}

impl SimDriver {
    pub fn new(available: Vec<u32>) -> Self {
        Self {
            available,
            ..Default::default()
        }
    }

    pub fn broken(available: Vec<u32>) -> Self {
        Self {
            available,
            always_fail_open: true,
            ..Default::default()
        }
    }

    /// Devices that can only be released by the thread reading them
    pub fn without_release_handle(available: Vec<u32>) -> Self {
        Self {
            available,
            no_release_handle: true,
            ..Default::default()
        }
    }

    /// Block every read until `resume_reads` or until the device is released
    pub fn stall_reads(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub fn resume_reads(&self) {
        self.stalled.store(false, Ordering::SeqCst);
    }

    /// Queue open outcomes, in order
    pub fn script_opens(&self, outcomes: &[bool]) {
        self.opens.lock().extend(outcomes.iter().copied());
    }

    /// Make the next `n` reads on any device fail
    pub fn fail_reads(&self, n: usize) {
        self.reads.lock().extend(std::iter::repeat(false).take(n));
    }

    pub fn pending_reads(&self) -> usize {
        self.reads.lock().len()
    }

    pub fn open_calls(&self) -> Vec<(u32, Backend)> {
        self.open_calls.lock().clone()
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl CameraEnumerator for SimDriver {
    fn list_available(&self, max_devices: u32) -> Vec<u32> {
        self.available
            .iter()
            .copied()
            .filter(|&i| i < max_devices)
            .collect()
    }
}

impl CameraDriver for SimDriver {
    fn open(&self, camera_index: u32, backend: Backend) -> Result<Box<dyn CameraDevice>> {
        self.open_calls.lock().push((camera_index, backend));
        let ok = !self.always_fail_open && self.opens.lock().pop_front().unwrap_or(true);
        if !ok {
            return Err(VisionError::Camera(format!("Simulated open failure on {}", backend)));
        }
        Ok(Box::new(SimDevice {
            reads: self.reads.clone(),
            stalled: self.stalled.clone(),
            with_handle: !self.no_release_handle,
            open: Arc::new(SimOpen {
                open: AtomicBool::new(true),
                releases: self.releases.clone(),
            }),
        }))
    }
}

/// Open flag shared by a device and its release handle
struct SimOpen {
    open: AtomicBool,
    releases: Arc<AtomicUsize>,
}

impl ReleaseHandle for SimOpen {
    fn release(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct SimDevice {
    reads: Arc<Mutex<VecDeque<bool>>>,
    stalled: Arc<AtomicBool>,
    with_handle: bool,
    open: Arc<SimOpen>,
}

impl CameraDevice for SimDevice {
    fn is_opened(&self) -> bool {
        self.open.open.load(Ordering::SeqCst)
    }

    fn read(&mut self) -> Result<Frame> {
        thread::sleep(Duration::from_millis(1));
        while self.stalled.load(Ordering::SeqCst) {
            if !self.is_opened() {
                return Err(VisionError::Camera("Device released during read".to_string()));
            }
            thread::sleep(Duration::from_millis(1));
        }
        if self.reads.lock().pop_front().unwrap_or(true) {
            Ok(Frame::solid(32, 24, [40, 80, 120]))
        } else {
            Err(VisionError::Camera("Simulated read failure".to_string()))
        }
    }

    fn release(&mut self) {
        ReleaseHandle::release(self.open.as_ref());
    }

    fn release_handle(&self) -> Option<Arc<dyn ReleaseHandle>> {
        if !self.with_handle {
            return None;
        }
        let handle: Arc<dyn ReleaseHandle> = self.open.clone();
        Some(handle)
    }
}

/// Model that reports the same detections for every frame
pub struct FakeModel {
    pub detections: Vec<DetectedObject>,
}

impl InferenceModel for FakeModel {
    fn infer(&self, _frame: &Frame, confidence: f32) -> Result<Vec<DetectedObject>> {
        Ok(self
            .detections
            .iter()
            .filter(|d| d.confidence >= confidence)
            .cloned()
            .collect())
    }
}

/// Model source that counts loads and can be told to fail
#[derive(Default)]
pub struct FakeSource {
    pub loads: AtomicUsize,
    pub fail: bool,
    pub detections: Vec<DetectedObject>,
}

impl ModelSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    fn load(&self, model_path: &str) -> Result<Arc<dyn InferenceModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(VisionError::Model(format!("{} unavailable", model_path)));
        }
        Ok(Arc::new(FakeModel {
            detections: self.detections.clone(),
        }))
    }
}

#[derive(Default)]
pub struct RecordingPersistence {
    pub saved: Mutex<Vec<(u32, u64, usize)>>,
}

impl Persistence for RecordingPersistence {
    fn save(&self, _frame: &Frame, detections: &[DetectedObject], camera_index: u32, frame_number: u64) -> Result<()> {
        self.saved.lock().push((camera_index, frame_number, detections.len()));
        Ok(())
    }
}

pub fn person(confidence: f32) -> DetectedObject {
    DetectedObject {
        class_id: 0,
        class_name: "person".to_string(),
        confidence,
        bbox: (2.0, 2.0, 8.0, 12.0),
    }
}

/// Defaults with every delay shrunk to keep tests fast
pub fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.camera_startup_delay_ms = 1;
    config.stop_join_timeout_ms = 2_000;
    config.realtime.frame_interval_ms = 5;
    config.realtime.save_interval = 5;
    config.capture.retry_delay_ms = 1;
    config.capture.release_settle_ms = 1;
    config.capture.read_retry_delay_ms = 1;
    config.capture.reconnect_idle_ms = 1;
    config
}

pub fn services(driver: Arc<SimDriver>, persistence: Arc<dyn Persistence>) -> WorkerServices {
    let source = Arc::new(FakeSource {
        detections: vec![person(0.9)],
        ..Default::default()
    });
    WorkerServices {
        driver,
        models: Arc::new(ModelRegistry::new(source, None)),
        persistence,
        annotator: Arc::new(BoxAnnotator::default()),
    }
}

/// Route worker logs to the test output; `RUST_LOG=vigil_eye=debug` for detail
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Next state event, waiting up to `timeout`
pub fn next_state(rx: &mut broadcast::Receiver<WorkerState>, timeout: Duration) -> Option<WorkerState> {
    let deadline = Instant::now() + timeout;
    loop {
        match rx.try_recv() {
            Ok(state) => return Some(state),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => return None,
            Err(TryRecvError::Empty) => {
                if Instant::now() >= deadline {
                    return None;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
    }
}
