//! Device open resilience: retries, backend fallback and exhaustion

mod common;

use common::{fast_config, services, wait_until, RecordingPersistence, SimDriver};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use vigil_eye::{Backend, CaptureSession, WorkerRegistry};

#[test]
fn test_succeeds_on_third_attempt_of_first_backend() {
    let driver = SimDriver::new(vec![0]);
    driver.script_opens(&[false, false, true]);
    let stop = AtomicBool::new(false);

    let session = CaptureSession::open(&driver, 0, &fast_config().capture, &stop).unwrap();

    assert_eq!(session.backend(), Backend::V4l2);
    assert_eq!(session.attempts(), 3);
    assert!(session.is_open());
    assert_eq!(driver.open_calls().len(), 3);
}

#[test]
fn test_failed_test_read_counts_as_failed_attempt() {
    let driver = SimDriver::new(vec![0]);
    driver.fail_reads(1);
    let stop = AtomicBool::new(false);

    let session = CaptureSession::open(&driver, 0, &fast_config().capture, &stop).unwrap();

    assert_eq!(session.backend(), Backend::V4l2);
    assert_eq!(session.attempts(), 2);
    // The device that failed its test read was released
    assert_eq!(driver.releases(), 1);
}

#[test]
fn test_exhausts_every_backend_exactly_once() {
    let driver = SimDriver::broken(vec![0]);
    let config = fast_config().capture;
    let stop = AtomicBool::new(false);

    let err = CaptureSession::open(&driver, 1, &config, &stop).unwrap_err();

    assert!(err.to_string().contains("any backend"));
    let calls = driver.open_calls();
    assert_eq!(calls.len() as u32, config.max_open_attempts());
    assert_eq!(calls.len(), 6);
    assert!(calls[..3].iter().all(|&(idx, b)| idx == 1 && b == Backend::V4l2));
    assert!(calls[3..].iter().all(|&(idx, b)| idx == 1 && b == Backend::Default));
}

#[test]
fn test_unopenable_camera_never_becomes_active() {
    let driver = Arc::new(SimDriver::broken(vec![0]));
    let registry = WorkerRegistry::new(
        fast_config(),
        services(driver.clone(), Arc::new(RecordingPersistence::default())),
    )
    .unwrap();

    assert!(registry.start(0, false));
    assert!(wait_until(Duration::from_secs(5), || registry.worker(0).is_none()));

    assert_eq!(driver.open_calls().len(), 6);
    assert!(!registry.status(0).active);
    assert_eq!(registry.active_count(), 0);
    // The index is free for a fresh attempt
    assert!(registry.start(0, false));
}
