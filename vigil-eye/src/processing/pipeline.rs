//! Detect-and-persist pipeline run on sampled frames

use super::annotate::{BoxAnnotator, FrameAnnotator};
use super::detection::Detector;
use super::persistence::Persistence;
use crate::frame::{DetectedObject, Frame};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// What happened to a sampled frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Detector ran and found nothing
    Empty,
    /// Detector found this many objects; persistence was attempted
    Detected(usize),
    /// Detector failed; the raw frame is still published
    DetectionFailed,
}

/// Composes detector, annotator and persistence for one worker
#[derive(Clone)]
pub struct FramePipeline {
    detector: Arc<dyn Detector>,
    persistence: Arc<dyn Persistence>,
    annotator: Arc<dyn FrameAnnotator>,
}

impl FramePipeline {
    pub fn new(detector: Arc<dyn Detector>, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            detector,
            persistence,
            annotator: Arc::new(BoxAnnotator::default()),
        }
    }

    pub fn with_annotator(mut self, annotator: Arc<dyn FrameAnnotator>) -> Self {
        self.annotator = annotator;
        self
    }

    /// Run detection on `frame` and return the variant to publish as the
    /// camera's latest frame. Persistence failures are logged, never raised.
    pub fn process(&self, frame: &Frame, camera_index: u32, frame_number: u64) -> (Frame, PipelineOutcome) {
        let start = Instant::now();
        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                warn!(camera = camera_index, frame = frame_number, "Detection error: {}", e);
                return (frame.clone(), PipelineOutcome::DetectionFailed);
            }
        };
        let elapsed = start.elapsed().as_secs_f64();

        if detections.is_empty() {
            let info = format!(
                "No objects detected | Frame: {} | Size: {} | Time: {:.3}s",
                frame_number,
                frame.size_label(),
                elapsed
            );
            info!(camera = camera_index, "{}", info);
            return (self.annotator.overlay_info(frame, &info), PipelineOutcome::Empty);
        }

        log_detections(camera_index, frame_number, elapsed, &detections);
        let annotated = self.annotator.annotate(frame, &detections);
        if let Err(e) = self
            .persistence
            .save(&annotated, &detections, camera_index, frame_number)
        {
            error!(camera = camera_index, frame = frame_number, "Error saving frame: {}", e);
        }
        let count = detections.len();
        (annotated, PipelineOutcome::Detected(count))
    }
}

fn log_detections(camera_index: u32, frame_number: u64, elapsed: f64, detections: &[DetectedObject]) {
    let mut per_class: Vec<(&str, usize, f32)> = Vec::new();
    for det in detections {
        match per_class.iter_mut().find(|(name, _, _)| *name == det.class_name) {
            Some((_, count, total)) => {
                *count += 1;
                *total += det.confidence;
            }
            None => per_class.push((det.class_name.as_str(), 1, det.confidence)),
        }
    }
    let classes = per_class
        .iter()
        .map(|(name, count, total)| format!("{}: {} (avg conf {:.2})", name, count, total / *count as f32))
        .collect::<Vec<_>>()
        .join(", ");
    info!(
        camera = camera_index,
        frame = frame_number,
        "Detected {} objects in {:.3}s: {}",
        detections.len(),
        elapsed,
        classes
    );
}
