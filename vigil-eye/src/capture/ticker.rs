//! Cancellable pacing for worker loops

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep; bounds how late a stop request is noticed
const STOP_POLL_SLICE: Duration = Duration::from_millis(50);

/// Sleep for `duration`, waking early if `stop` is raised.
///
/// Returns `true` when the full duration elapsed, `false` when stopped.
pub fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(STOP_POLL_SLICE));
    }
}

/// Fixed-interval ticker driving a worker's read loop
#[derive(Debug, Clone, Copy)]
pub struct Ticker {
    interval: Duration,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait one interval. `false` means the caller should stop.
    pub fn wait(&self, stop: &AtomicBool) -> bool {
        sleep_unless_stopped(self.interval, stop)
    }
}
