//! Inactivity reaper: floor, timeout and eviction order

mod common;

use common::{init_tracing, fast_config, services, wait_until, RecordingPersistence, SimDriver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use vigil_eye::{InactivityReaper, WorkerRegistry, WorkerState};

const WAIT: Duration = Duration::from_secs(5);
const HOUR: Duration = Duration::from_secs(3600);

fn running_registry(cameras: u32) -> Arc<WorkerRegistry> {
    init_tracing();
    let driver = Arc::new(SimDriver::new((0..cameras).collect()));
    let registry = Arc::new(
        WorkerRegistry::new(
            fast_config(),
            services(driver, Arc::new(RecordingPersistence::default())),
        )
        .unwrap(),
    );
    for index in 0..cameras {
        assert!(registry.start(index, false));
        assert!(wait_until(WAIT, || registry.status(index).active
            && registry.status(index).state == Some(WorkerState::Running)));
        // Distinct last-access times
        thread::sleep(Duration::from_millis(2));
    }
    registry
}

#[test]
fn test_never_evicts_at_floor() {
    let registry = running_registry(2);
    let reaper = InactivityReaper::new(registry.clone(), Duration::from_secs(300), 2);

    let stopped = reaper.sweep(Instant::now() + HOUR);

    assert!(stopped.is_empty());
    assert_eq!(registry.active_count(), 2);
    registry.stop_all();
}

#[test]
fn test_evicts_only_idle_workers() {
    let registry = running_registry(4);
    thread::sleep(Duration::from_millis(50));
    registry.touch(2);
    registry.touch(3);

    let reaper = InactivityReaper::new(registry.clone(), Duration::from_millis(30), 1);
    let mut stopped = reaper.sweep(Instant::now());
    stopped.sort();

    assert_eq!(stopped, vec![0, 1]);
    assert_eq!(registry.active_count(), 2);
    assert!(registry.status(2).active);
    assert!(registry.status(3).active);
    registry.stop_all();
}

#[test]
fn test_eviction_stops_at_floor_oldest_first() {
    let registry = running_registry(4);
    let reaper = InactivityReaper::new(registry.clone(), Duration::from_secs(300), 2);

    let stopped = reaper.sweep(Instant::now() + HOUR);

    assert_eq!(stopped, vec![0, 1]);
    assert_eq!(registry.active_count(), 2);
    registry.stop_all();
}

#[test]
fn test_fresh_workers_survive() {
    let registry = running_registry(3);
    let reaper = InactivityReaper::new(registry.clone(), Duration::from_secs(300), 0);

    assert!(reaper.sweep(Instant::now()).is_empty());
    assert_eq!(registry.active_count(), 3);
    registry.stop_all();
}

#[test]
fn test_background_reaper_evicts_and_shuts_down() {
    let registry = running_registry(1);
    let handle = InactivityReaper::spawn(
        registry.clone(),
        Duration::from_millis(20),
        Duration::from_millis(1),
        0,
    )
    .unwrap();

    assert!(wait_until(WAIT, || registry.active_count() == 0));
    assert!(registry.worker(0).is_none());
    handle.shutdown();
}

#[test]
fn test_configured_reaper_keeps_two_cameras() {
    let registry = running_registry(3);
    let reaper = InactivityReaper::from_config(registry.clone());
    assert_eq!(reaper.floor(), 2);
    assert_eq!(reaper.timeout(), Duration::from_secs(300));

    assert!(reaper.sweep(Instant::now()).is_empty());
    let stopped = reaper.sweep(Instant::now() + HOUR);

    assert_eq!(stopped, vec![0]);
    assert_eq!(registry.active_count(), 2);
    registry.stop_all();
}

#[test]
fn test_configured_background_reaper() {
    init_tracing();
    let mut config = fast_config();
    config.inactive_camera_timeout_secs = 0;
    config.reaper_interval_secs = 1;
    config.reaper_floor = 0;
    let driver = Arc::new(SimDriver::new(vec![0]));
    let registry = Arc::new(
        WorkerRegistry::new(config, services(driver, Arc::new(RecordingPersistence::default()))).unwrap(),
    );
    assert!(registry.start(0, false));
    assert!(wait_until(WAIT, || registry.status(0).active));

    let handle = InactivityReaper::spawn_configured(registry.clone()).unwrap();
    assert!(wait_until(WAIT, || registry.active_count() == 0));
    handle.shutdown();
}
