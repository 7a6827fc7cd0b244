//! Per-frame processing: detection, annotation and persistence

pub mod annotate;
pub mod detection;
pub mod persistence;
pub mod pipeline;

pub use annotate::{detection_summary, BoxAnnotator, FrameAnnotator};
pub use detection::{Detector, ModelDetector};
pub use persistence::{DiskPersistence, FrameRecord, ObjectRecord, Persistence};
pub use pipeline::{FramePipeline, PipelineOutcome};
