//! Per-camera worker: open, read, detect, persist, reconnect

use crate::capture::{
    sleep_unless_stopped, CameraDriver, CameraEnumerator, CaptureSession, ReleaseHandle, Ticker,
};
use crate::config::{CaptureConfig, OrchestratorConfig};
use crate::error::Result;
use crate::frame::Frame;
use crate::models::ModelRegistry;
use crate::processing::{FrameAnnotator, FramePipeline, ModelDetector, Persistence};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const STATE_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of one worker run. `Stopped` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerState {
    Idle,
    Selecting,
    Opened,
    Running,
    Reconnecting,
    Stopped,
    Error,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Error)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Selecting => "selecting",
            WorkerState::Opened => "opened",
            WorkerState::Running => "running",
            WorkerState::Reconnecting => "reconnecting",
            WorkerState::Stopped => "stopped",
            WorkerState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Collaborators shared by every worker
#[derive(Clone)]
pub struct WorkerServices {
    pub driver: Arc<dyn CameraDriver>,
    pub models: Arc<ModelRegistry>,
    pub persistence: Arc<dyn Persistence>,
    pub annotator: Arc<dyn FrameAnnotator>,
}

/// Per-worker settings, fixed when the worker is created
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub model_path: String,
    pub confidence: f32,
    pub include_classes: Vec<String>,
    pub exclude_classes: Vec<String>,
    pub save_interval: u64,
    pub throttle: Duration,
    pub max_devices: u32,
    pub capture: CaptureConfig,
}

impl WorkerSettings {
    pub fn from_config(config: &OrchestratorConfig, throttle: Duration) -> Self {
        Self {
            model_path: config.realtime.model_path.clone(),
            confidence: config.realtime.confidence,
            include_classes: config.realtime.include_classes.clone(),
            exclude_classes: config.realtime.exclude_classes.clone(),
            save_interval: config.realtime.save_interval.max(1),
            throttle,
            max_devices: config.max_devices,
            capture: config.capture.clone(),
        }
    }
}

/// Pick the device to open: the requested index, else the first enumerated
/// device, else 0.
pub fn select_camera<E>(enumerator: &E, requested: Option<u32>, max_devices: u32) -> u32
where
    E: CameraEnumerator + ?Sized,
{
    if let Some(index) = requested {
        return index;
    }
    match enumerator.list_available(max_devices).first() {
        Some(&index) => {
            info!("Auto-selected camera {}", index);
            index
        }
        None => {
            warn!("No cameras enumerated, falling back to index 0");
            0
        }
    }
}

/// Why the frame loop left `Running`
enum LoopExit {
    Stopped,
    Failed,
}

/// One camera's capture loop. Created per start request and never reused
/// after it reaches a terminal state.
pub struct CameraWorker {
    requested_index: Option<u32>,
    camera_index: AtomicU32,
    show_preview: bool,
    settings: WorkerSettings,
    services: WorkerServices,
    state: RwLock<WorkerState>,
    events: broadcast::Sender<WorkerState>,
    frame_count: AtomicU64,
    read_failures: AtomicU32,
    reconnects: AtomicU64,
    latest: RwLock<Option<Frame>>,
    session: Mutex<Option<CaptureSession>>,
    release_handle: Mutex<Option<Arc<dyn ReleaseHandle>>>,
    should_stop: AtomicBool,
    last_access: Mutex<Instant>,
}

impl CameraWorker {
    pub fn new(
        requested_index: Option<u32>,
        show_preview: bool,
        settings: WorkerSettings,
        services: WorkerServices,
    ) -> Self {
        let (events, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            requested_index,
            camera_index: AtomicU32::new(requested_index.unwrap_or(0)),
            show_preview,
            settings,
            services,
            state: RwLock::new(WorkerState::Idle),
            events,
            frame_count: AtomicU64::new(0),
            read_failures: AtomicU32::new(0),
            reconnects: AtomicU64::new(0),
            latest: RwLock::new(None),
            session: Mutex::new(None),
            release_handle: Mutex::new(None),
            should_stop: AtomicBool::new(false),
            last_access: Mutex::new(Instant::now()),
        }
    }

    pub fn camera_index(&self) -> u32 {
        self.camera_index.load(Ordering::Acquire)
    }

    pub fn show_preview(&self) -> bool {
        self.show_preview
    }

    pub fn throttle_interval(&self) -> Duration {
        self.settings.throttle
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    /// State transitions from now on. Lagging receivers lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerState> {
        self.events.subscribe()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    /// Consecutive failed reads since the last good frame
    pub fn read_failures(&self) -> u32 {
        self.read_failures.load(Ordering::Acquire)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Acquire)
    }

    /// Most recently published frame
    pub fn current_frame(&self) -> Option<Frame> {
        self.latest.read().clone()
    }

    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    pub fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    /// Ask the run loop to exit. Safe from any thread; returns `false` if a
    /// stop was already requested.
    pub fn request_stop(&self) -> bool {
        !self.should_stop.swap(true, Ordering::AcqRel)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.should_stop.load(Ordering::Acquire)
    }

    /// Release the capture device from outside the run loop.
    ///
    /// Waits at most `timeout` for the session lock. If a read stuck inside
    /// the driver still holds it, the device's release handle is used
    /// instead, which also unblocks the read. Returns `false` only when the
    /// device stays held: busy with no handle to release it through.
    pub fn force_release(&self, timeout: Duration) -> bool {
        if let Some(mut session) = self.session.try_lock_for(timeout) {
            if let Some(s) = session.as_mut() {
                s.release();
            }
            self.release_handle.lock().take();
            return true;
        }

        let handle = self.release_handle.lock().take();
        match handle {
            Some(handle) => {
                warn!(camera = self.camera_index(), "Capture is stuck in a read, releasing through device handle");
                handle.release();
                true
            }
            None => {
                warn!(camera = self.camera_index(), "Capture is busy and has no release handle");
                false
            }
        }
    }

    /// Drive the worker until it is stopped or fails. Returns the final state.
    pub fn run(&self) -> WorkerState {
        self.set_state(WorkerState::Selecting);
        let camera_index = select_camera(
            self.services.driver.as_ref(),
            self.requested_index,
            self.settings.max_devices,
        );
        self.camera_index.store(camera_index, Ordering::Release);

        let pipeline = match self.build_pipeline() {
            Ok(pipeline) => pipeline,
            Err(e) => {
                if self.is_stop_requested() {
                    info!(camera = camera_index, "Stopped while loading model");
                    return self.finish(WorkerState::Stopped);
                }
                error!(camera = camera_index, "Failed to load model: {}", e);
                return self.finish(WorkerState::Error);
            }
        };

        if !self.open_session(camera_index) {
            let state = if self.is_stop_requested() {
                WorkerState::Stopped
            } else {
                WorkerState::Error
            };
            return self.finish(state);
        }
        self.set_state(WorkerState::Opened);
        self.set_state(WorkerState::Running);
        info!(
            camera = camera_index,
            throttle_ms = self.settings.throttle.as_millis() as u64,
            preview = self.show_preview,
            "Camera worker running"
        );

        let state = match self.frame_loop(camera_index, &pipeline) {
            LoopExit::Stopped => WorkerState::Stopped,
            LoopExit::Failed => WorkerState::Error,
        };
        self.finish(state)
    }

    fn build_pipeline(&self) -> Result<FramePipeline> {
        let model = self
            .services
            .models
            .acquire(&self.settings.model_path, self.settings.confidence)?;
        let detector = ModelDetector::new(model).with_classes(
            self.settings.include_classes.clone(),
            self.settings.exclude_classes.clone(),
        );
        Ok(FramePipeline::new(Arc::new(detector), self.services.persistence.clone())
            .with_annotator(self.services.annotator.clone()))
    }

    fn open_session(&self, camera_index: u32) -> bool {
        match CaptureSession::open(
            self.services.driver.as_ref(),
            camera_index,
            &self.settings.capture,
            &self.should_stop,
        ) {
            Ok(session) => {
                let handle = session.release_handle();
                let mut slot = self.session.lock();
                *slot = Some(session);
                *self.release_handle.lock() = handle;
                true
            }
            Err(e) => {
                error!(camera = camera_index, "{}", e);
                false
            }
        }
    }

    fn frame_loop(&self, camera_index: u32, pipeline: &FramePipeline) -> LoopExit {
        let ticker = Ticker::new(self.settings.throttle);
        let threshold = self.settings.capture.read_failure_threshold;

        loop {
            if self.is_stop_requested() {
                return LoopExit::Stopped;
            }

            let read = {
                let mut session = self.session.lock();
                match session.as_mut() {
                    Some(s) if s.is_open() => Some(s.read()),
                    _ => None,
                }
            };
            if self.is_stop_requested() {
                return LoopExit::Stopped;
            }

            let frame = match read {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    let failures = self.read_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    debug!(camera = camera_index, failures, "Failed to read frame: {}", e);
                    if failures > threshold {
                        warn!(camera = camera_index, failures, "Too many read failures, reconnecting");
                        if let Some(exit) = self.reconnect(camera_index) {
                            return exit;
                        }
                    } else if !sleep_unless_stopped(self.settings.capture.read_retry_delay(), &self.should_stop) {
                        return LoopExit::Stopped;
                    }
                    continue;
                }
                None => {
                    warn!(camera = camera_index, "Camera is no longer open, reconnecting");
                    if let Some(exit) = self.reconnect(camera_index) {
                        return exit;
                    }
                    continue;
                }
            };

            self.read_failures.store(0, Ordering::Release);
            let frame_number = self.frame_count.fetch_add(1, Ordering::AcqRel) + 1;
            let published = if frame_number % self.settings.save_interval == 0 {
                pipeline.process(&frame, camera_index, frame_number).0
            } else {
                frame
            };
            *self.latest.write() = Some(published);

            if !ticker.wait(&self.should_stop) {
                return LoopExit::Stopped;
            }
        }
    }

    /// Release, settle, reopen. `None` means the worker is running again.
    fn reconnect(&self, camera_index: u32) -> Option<LoopExit> {
        self.set_state(WorkerState::Reconnecting);
        self.reconnects.fetch_add(1, Ordering::AcqRel);
        self.release_capture();

        if !sleep_unless_stopped(self.settings.capture.release_settle(), &self.should_stop) {
            return Some(LoopExit::Stopped);
        }
        if !self.open_session(camera_index) {
            return Some(if self.is_stop_requested() {
                LoopExit::Stopped
            } else {
                error!(camera = camera_index, "Reconnection failed");
                LoopExit::Failed
            });
        }

        self.read_failures.store(0, Ordering::Release);
        self.set_state(WorkerState::Running);
        info!(camera = camera_index, "Camera reconnected");
        if !sleep_unless_stopped(self.settings.capture.reconnect_idle(), &self.should_stop) {
            return Some(LoopExit::Stopped);
        }
        None
    }

    fn release_capture(&self) -> bool {
        let mut session = self.session.lock();
        self.release_handle.lock().take();
        session.as_mut().map(|s| s.release()).unwrap_or(false)
    }

    fn finish(&self, state: WorkerState) -> WorkerState {
        let released = self.release_capture();
        *self.session.lock() = None;
        *self.latest.write() = None;
        if released {
            // Let the device settle before the index can be reopened
            thread::sleep(self.settings.capture.release_settle());
        }
        self.set_state(state);
        info!(camera = self.camera_index(), %state, frames = self.frame_count(), "Camera worker exited");
        state
    }

    fn set_state(&self, state: WorkerState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(camera = self.camera_index(), from = %previous, to = %state, "Worker state change");
        }
        // No subscribers is fine
        let _ = self.events.send(state);
    }
}
