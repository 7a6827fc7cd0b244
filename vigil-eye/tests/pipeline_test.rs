//! Detect-and-persist pipeline against a mocked persistence layer

mod common;

use common::{person, FakeSource};
use mockall::mock;
use std::sync::Arc;
use vigil_eye::processing::{FramePipeline, ModelDetector, PipelineOutcome};
use vigil_eye::{DetectedObject, Frame, ModelRegistry, Persistence, Result, VisionError};

mock! {
    pub Store {}

    impl Persistence for Store {
        fn save(
            &self,
            frame: &Frame,
            detections: &[DetectedObject],
            camera_index: u32,
            frame_number: u64,
        ) -> Result<()>;
    }
}

fn detector(detections: Vec<DetectedObject>) -> Arc<ModelDetector> {
    let registry = ModelRegistry::new(
        Arc::new(FakeSource {
            detections,
            ..Default::default()
        }),
        None,
    );
    Arc::new(ModelDetector::new(registry.acquire("yolov5n.pt", 0.5).unwrap()))
}

#[test]
fn test_detections_are_saved_once_with_frame_number() {
    let mut store = MockStore::new();
    store
        .expect_save()
        .withf(|frame, detections, camera_index, frame_number| {
            frame.caption() == Some("person: 2")
                && detections.len() == 2
                && *camera_index == 3
                && *frame_number == 40
        })
        .times(1)
        .returning(|_, _, _, _| Ok(()));

    let pipeline = FramePipeline::new(detector(vec![person(0.9), person(0.7)]), Arc::new(store));
    let (published, outcome) = pipeline.process(&Frame::solid(32, 24, [0, 0, 0]), 3, 40);

    assert_eq!(outcome, PipelineOutcome::Detected(2));
    assert_eq!(published.caption(), Some("person: 2"));
}

#[test]
fn test_save_failure_is_swallowed() {
    let mut store = MockStore::new();
    store
        .expect_save()
        .times(1)
        .returning(|_, _, _, _| Err(VisionError::Persistence("database is locked".to_string())));

    let pipeline = FramePipeline::new(detector(vec![person(0.9)]), Arc::new(store));
    let (published, outcome) = pipeline.process(&Frame::solid(32, 24, [0, 0, 0]), 0, 20);

    assert_eq!(outcome, PipelineOutcome::Detected(1));
    assert!(published.caption().is_some());
}

#[test]
fn test_nothing_saved_without_detections() {
    let mut store = MockStore::new();
    store.expect_save().never();

    // Below the 0.5 threshold
    let pipeline = FramePipeline::new(detector(vec![person(0.2)]), Arc::new(store));
    let (published, outcome) = pipeline.process(&Frame::solid(32, 24, [0, 0, 0]), 1, 60);

    assert_eq!(outcome, PipelineOutcome::Empty);
    let caption = published.caption().unwrap();
    assert!(caption.starts_with("No objects detected | Frame: 60 | Size: 32x24"));
}

#[test]
fn test_excluded_classes_are_not_saved() {
    let mut store = MockStore::new();
    store.expect_save().never();

    let model = ModelRegistry::new(
        Arc::new(FakeSource {
            detections: vec![person(0.9)],
            ..Default::default()
        }),
        None,
    )
    .acquire("yolov5n.pt", 0.5)
    .unwrap();
    let detector = ModelDetector::new(model).with_classes(Vec::new(), vec!["person".to_string()]);
    let pipeline = FramePipeline::new(Arc::new(detector), Arc::new(store));

    let (_, outcome) = pipeline.process(&Frame::solid(32, 24, [0, 0, 0]), 2, 100);
    assert_eq!(outcome, PipelineOutcome::Empty);
}
