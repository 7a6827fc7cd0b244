//! Periodic eviction of idle camera workers

use crate::error::Result;
use crate::registry::WorkerRegistry;
use crossbeam::channel::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Stops workers nobody has read from for `timeout`, but never takes the
/// active count below `floor`.
pub struct InactivityReaper {
    registry: Arc<WorkerRegistry>,
    timeout: Duration,
    floor: usize,
}

impl InactivityReaper {
    pub fn new(registry: Arc<WorkerRegistry>, timeout: Duration, floor: usize) -> Self {
        Self {
            registry,
            timeout,
            floor,
        }
    }

    /// Reaper using the registry's configured inactivity timeout and floor
    pub fn from_config(registry: Arc<WorkerRegistry>) -> Self {
        let config = registry.config();
        let (timeout, floor) = (config.inactive_camera_timeout(), config.reaper_floor);
        Self::new(registry, timeout, floor)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn floor(&self) -> usize {
        self.floor
    }

    /// One pass as of `now`. Returns the camera indices that were stopped.
    ///
    /// Longest-idle workers go first, and only as many as keeps `floor`
    /// workers alive.
    pub fn sweep(&self, now: Instant) -> Vec<u32> {
        let activity = self.registry.activity();
        let active = activity.len();
        if active <= self.floor {
            debug!(active, floor = self.floor, "Reaper skipped: at or below floor");
            return Vec::new();
        }

        let mut idle: Vec<(u32, Instant)> = activity
            .into_iter()
            .filter(|(_, last_access)| now.saturating_duration_since(*last_access) > self.timeout)
            .collect();
        idle.sort_by_key(|&(index, last_access)| (last_access, index));
        idle.truncate(active - self.floor);

        let mut stopped = Vec::new();
        for (camera_index, last_access) in idle {
            info!(
                camera = camera_index,
                idle_secs = now.saturating_duration_since(last_access).as_secs(),
                "Stopping inactive camera"
            );
            if self.registry.stop(camera_index) {
                stopped.push(camera_index);
            }
        }
        stopped
    }

    /// Sweep every `interval` on a background thread until the handle is
    /// shut down or dropped.
    pub fn spawn(
        registry: Arc<WorkerRegistry>,
        interval: Duration,
        timeout: Duration,
        floor: usize,
    ) -> Result<ReaperHandle> {
        Self::new(registry, timeout, floor).run_every(interval)
    }

    /// `spawn` with the interval, timeout and floor from the registry's config
    pub fn spawn_configured(registry: Arc<WorkerRegistry>) -> Result<ReaperHandle> {
        let interval = registry.config().reaper_interval();
        Self::from_config(registry).run_every(interval)
    }

    fn run_every(self, interval: Duration) -> Result<ReaperHandle> {
        let (timeout, floor) = (self.timeout, self.floor);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("inactivity-reaper".into())
            .spawn(move || {
                let ticker = channel::tick(interval);
                loop {
                    channel::select! {
                        recv(ticker) -> _ => {
                            let stopped = self.sweep(Instant::now());
                            if !stopped.is_empty() {
                                info!(stopped = ?stopped, "Reaper evicted idle cameras");
                            }
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!("Inactivity reaper exited");
            })?;

        info!(
            interval_secs = interval.as_secs(),
            timeout_secs = timeout.as_secs(),
            floor,
            "Inactivity reaper started"
        );
        Ok(ReaperHandle {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

/// Owns the reaper thread; dropping it stops the thread without waiting
pub struct ReaperHandle {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for an in-flight sweep to finish
    pub fn shutdown(mut self) {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the select
        self.shutdown.take();
    }
}
