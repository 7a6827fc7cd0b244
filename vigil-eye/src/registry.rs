//! Process-wide camera worker registry

use crate::config::OrchestratorConfig;
use crate::error::{Result, VisionError};
use crate::frame::Frame;
use crate::worker::{CameraWorker, WorkerServices, WorkerSettings, WorkerState};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long `stop` waits for the session lock when force-releasing
pub const FORCE_RELEASE_WAIT: Duration = Duration::from_millis(500);

/// Per-frame sleep for a worker created while `active_workers` others run:
/// `base * clamp(active / 2, 1, 3)`.
pub fn throttle_interval(base: Duration, active_workers: usize) -> Duration {
    let multiplier = (active_workers as f64 / 2.0).clamp(1.0, 3.0);
    Duration::from_nanos((base.as_nanos() as f64 * multiplier).round() as u64)
}

/// Point-in-time view of one camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraStatus {
    pub camera_index: u32,
    pub active: bool,
    pub state: Option<WorkerState>,
    pub frame_count: u64,
    pub reconnects: u64,
    pub show_preview: bool,
}

impl CameraStatus {
    fn inactive(camera_index: u32) -> Self {
        Self {
            camera_index,
            active: false,
            state: None,
            frame_count: 0,
            reconnects: 0,
            show_preview: false,
        }
    }
}

struct WorkerSlot {
    worker: Arc<CameraWorker>,
    running: bool,
    thread: Option<JoinHandle<()>>,
    done: Receiver<()>,
    generation: u64,
}

type Slots = Arc<Mutex<HashMap<u32, WorkerSlot>>>;

/// Removes the slot when the worker thread exits, unless a newer worker
/// already took the index.
struct SlotGuard {
    slots: Slots,
    camera_index: u32,
    generation: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if slots
            .get(&self.camera_index)
            .map_or(false, |slot| slot.generation == self.generation)
        {
            slots.remove(&self.camera_index);
        }
    }
}

/// Starts, stops and tracks one worker per camera index.
///
/// Every map mutation happens under a single lock; device I/O and inference
/// run on the worker threads and never while that lock is held.
pub struct WorkerRegistry {
    config: OrchestratorConfig,
    services: WorkerServices,
    slots: Slots,
    globally_stopped: AtomicBool,
    next_generation: AtomicU64,
}

impl WorkerRegistry {
    pub fn new(config: OrchestratorConfig, services: WorkerServices) -> Result<Self> {
        config.validate().map_err(VisionError::Config)?;
        Ok(Self {
            config,
            services,
            slots: Arc::new(Mutex::new(HashMap::new())),
            globally_stopped: AtomicBool::new(false),
            next_generation: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Launch a worker for `camera_index` without waiting for it to run.
    ///
    /// Returns `false` while globally stopped or when the index already has a
    /// worker; of several concurrent callers at most one wins.
    pub fn start(&self, camera_index: u32, show_preview: bool) -> bool {
        let mut slots = self.slots.lock();
        if self.is_globally_stopped() {
            warn!(camera = camera_index, "Start rejected: global stop is active");
            return false;
        }
        if slots.contains_key(&camera_index) {
            debug!(camera = camera_index, "Start rejected: camera already has a worker");
            return false;
        }

        let active = slots.values().filter(|s| s.running).count();
        let throttle = throttle_interval(self.config.realtime.frame_interval(), active);
        let settings = WorkerSettings::from_config(&self.config, throttle);
        let worker = Arc::new(CameraWorker::new(
            Some(camera_index),
            show_preview,
            settings,
            self.services.clone(),
        ));
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = channel::bounded::<()>(1);

        let shared_slots = self.slots.clone();
        let runner = worker.clone();
        let spawned = thread::Builder::new()
            .name(format!("camera-{}", camera_index))
            .spawn(move || {
                let _done = done_tx;
                let guard = SlotGuard {
                    slots: shared_slots,
                    camera_index,
                    generation,
                };
                {
                    let mut slots = guard.slots.lock();
                    match slots.get_mut(&guard.camera_index) {
                        Some(slot) if slot.generation == guard.generation && !runner.is_stop_requested() => {
                            slot.running = true;
                        }
                        _ => return,
                    }
                }
                let state = runner.run();
                info!(camera = guard.camera_index, %state, "Camera thread finished");
            });

        let thread = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!(camera = camera_index, "Failed to spawn camera thread: {}", e);
                return false;
            }
        };

        slots.insert(
            camera_index,
            WorkerSlot {
                worker,
                running: false,
                thread: Some(thread),
                done: done_rx,
                generation,
            },
        );
        info!(
            camera = camera_index,
            active,
            throttle_ms = throttle.as_millis() as u64,
            "Camera worker started"
        );
        true
    }

    /// Stop the worker for `camera_index`. A no-op returning `false` when the
    /// camera is not running; a worker still starting up is told to exit as
    /// soon as it runs.
    ///
    /// Waits up to the configured join timeout for the worker thread, then
    /// force-releases its capture and drops the handle. If the device cannot
    /// be released the index stays reserved until the thread exits, so no new
    /// worker can open it in the meantime.
    pub fn stop(&self, camera_index: u32) -> bool {
        let (worker, thread, done, generation) = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(&camera_index) else {
                debug!(camera = camera_index, "Stop ignored: camera not running");
                return false;
            };
            if !slot.running {
                if slot.worker.request_stop() {
                    debug!(camera = camera_index, "Camera still starting, asked it to exit");
                }
                return false;
            }
            slot.running = false;
            (slot.worker.clone(), slot.thread.take(), slot.done.clone(), slot.generation)
        };

        info!(camera = camera_index, "Stopping camera");
        worker.request_stop();
        match done.recv_timeout(self.config.stop_join_timeout()) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    camera = camera_index,
                    "Worker did not exit within {:?}, detaching",
                    self.config.stop_join_timeout()
                );
            }
            _ => {
                if let Some(thread) = thread {
                    if thread.join().is_err() {
                        error!(camera = camera_index, "Camera thread panicked");
                    }
                }
            }
        }

        if !worker.force_release(FORCE_RELEASE_WAIT) {
            warn!(
                camera = camera_index,
                "Camera still held by its worker, index reserved until the thread exits"
            );
            return true;
        }

        let mut slots = self.slots.lock();
        if slots
            .get(&camera_index)
            .map_or(false, |slot| slot.generation == generation)
        {
            slots.remove(&camera_index);
        }
        info!(camera = camera_index, "Camera stopped");
        true
    }

    /// Block new starts and stop every running camera. Returns how many were
    /// stopped.
    pub fn stop_all(&self) -> usize {
        self.globally_stopped.store(true, Ordering::Release);
        let running: Vec<u32> = {
            let slots = self.slots.lock();
            for slot in slots.values().filter(|s| !s.running) {
                // Still starting up; make it exit as soon as it runs
                slot.worker.request_stop();
            }
            slots
                .iter()
                .filter(|(_, slot)| slot.running)
                .map(|(&index, _)| index)
                .collect()
        };

        let stopped = running.into_iter().filter(|&index| self.stop(index)).count();
        info!(stopped, "All cameras stopped, new starts blocked");
        stopped
    }

    /// Lift the block set by `stop_all`. Starts nothing by itself.
    pub fn allow_start(&self) {
        self.globally_stopped.store(false, Ordering::Release);
        info!("Camera starts allowed");
    }

    pub fn is_globally_stopped(&self) -> bool {
        self.globally_stopped.load(Ordering::Acquire)
    }

    /// Start up to `max_concurrent` enumerated cameras, pausing between device
    /// opens. Returns the count and indices actually started.
    pub fn start_all(&self, max_concurrent: usize) -> (usize, Vec<u32>) {
        if self.is_globally_stopped() {
            warn!("start_all rejected: global stop is active");
            return (0, Vec::new());
        }

        let available = self.services.driver.list_available(self.config.max_devices);
        info!(available = ?available, max_concurrent, "Starting cameras");

        let mut started = Vec::new();
        for (position, camera_index) in available.into_iter().take(max_concurrent).enumerate() {
            if position > 0 {
                thread::sleep(self.config.camera_startup_delay());
            }
            if self.start(camera_index, false) {
                self.touch(camera_index);
                started.push(camera_index);
            }
        }
        (started.len(), started)
    }

    /// `start_all` capped at the configured `max_concurrent_cameras`
    pub fn start_all_configured(&self) -> (usize, Vec<u32>) {
        self.start_all(self.config.max_concurrent_cameras)
    }

    /// Stop then start `camera_index` with a fresh worker. A worker still
    /// starting up is waited out, up to the join timeout, before the start.
    pub fn restart(&self, camera_index: u32, show_preview: bool) -> bool {
        if !self.stop(camera_index) {
            self.wait_for_exit(camera_index);
        }
        self.start(camera_index, show_preview)
    }

    fn wait_for_exit(&self, camera_index: u32) {
        let done = self.slots.lock().get(&camera_index).map(|s| s.done.clone());
        if let Some(done) = done {
            // The slot is gone by the time the channel disconnects
            let _ = done.recv_timeout(self.config.stop_join_timeout());
        }
    }

    pub fn status(&self, camera_index: u32) -> CameraStatus {
        self.slots
            .lock()
            .get(&camera_index)
            .map(|slot| slot_status(camera_index, slot))
            .unwrap_or_else(|| CameraStatus::inactive(camera_index))
    }

    /// Every camera with a worker, sorted by index
    pub fn status_all(&self) -> Vec<CameraStatus> {
        let mut all: Vec<CameraStatus> = self
            .slots
            .lock()
            .iter()
            .map(|(&index, slot)| slot_status(index, slot))
            .collect();
        all.sort_by_key(|s| s.camera_index);
        all
    }

    pub fn active_count(&self) -> usize {
        self.slots.lock().values().filter(|s| s.running).count()
    }

    /// Record a consumer reading from `camera_index`
    pub fn touch(&self, camera_index: u32) -> bool {
        match self.slots.lock().get(&camera_index) {
            Some(slot) => {
                slot.worker.touch();
                true
            }
            None => false,
        }
    }

    pub fn current_frame(&self, camera_index: u32) -> Option<Frame> {
        let worker = self.slots.lock().get(&camera_index).map(|s| s.worker.clone())?;
        worker.current_frame()
    }

    /// Worker for `camera_index`, if one is registered
    pub fn worker(&self, camera_index: u32) -> Option<Arc<CameraWorker>> {
        self.slots.lock().get(&camera_index).map(|s| s.worker.clone())
    }

    /// Last-access time of every running worker
    pub fn activity(&self) -> Vec<(u32, Instant)> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.running)
            .map(|(&index, slot)| (index, slot.worker.last_access()))
            .collect()
    }
}

fn slot_status(camera_index: u32, slot: &WorkerSlot) -> CameraStatus {
    CameraStatus {
        camera_index,
        active: slot.running,
        state: Some(slot.worker.state()),
        frame_count: slot.worker.frame_count(),
        reconnects: slot.worker.reconnects(),
        show_preview: slot.worker.show_preview(),
    }
}

impl Drop for WorkerRegistry {
    fn drop(&mut self) {
        for slot in self.slots.lock().values() {
            slot.worker.request_stop();
        }
    }
}
