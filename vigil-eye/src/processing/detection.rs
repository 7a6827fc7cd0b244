//! Object detection

use crate::error::Result;
use crate::frame::{DetectedObject, Frame};
use crate::models::ModelHandle;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Black-box detector: frame in, labelled boxes out
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<DetectedObject>>;
}

/// Detector backed by a shared model handle with class filtering
pub struct ModelDetector {
    model: Arc<ModelHandle>,
    include_classes: Vec<String>,
    exclude_classes: Vec<String>,
}

impl ModelDetector {
    pub fn new(model: Arc<ModelHandle>) -> Self {
        Self {
            model,
            include_classes: Vec::new(),
            exclude_classes: Vec::new(),
        }
    }

    /// Keep only `include` (when non-empty) and drop `exclude`
    pub fn with_classes(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.include_classes = include;
        self.exclude_classes = exclude;
        self
    }

    pub fn model(&self) -> &Arc<ModelHandle> {
        &self.model
    }

    fn keep(&self, detection: &DetectedObject) -> bool {
        let included = self.include_classes.is_empty()
            || self.include_classes.iter().any(|c| c == &detection.class_name);
        included && !self.exclude_classes.iter().any(|c| c == &detection.class_name)
    }
}

impl Detector for ModelDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<DetectedObject>> {
        let start = Instant::now();
        let detections: Vec<DetectedObject> = self
            .model
            .infer(frame)?
            .into_iter()
            .filter(|d| self.keep(d))
            .collect();
        debug!(
            "Frame processed in {:.3}s | Found {} objects",
            start.elapsed().as_secs_f64(),
            detections.len()
        );
        Ok(detections)
    }
}
