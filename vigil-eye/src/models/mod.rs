//! Inference model loading and process-wide sharing

pub mod registry;
pub mod sources;

pub use registry::{ModelHandle, ModelRegistry};
pub use sources::{HttpModelSource, LocalModelSource};

use crate::error::Result;
use crate::frame::{DetectedObject, Frame};
use std::path::Path;
use std::sync::Arc;

/// A loaded inference model. Treated as a black box: safe to call
/// repeatedly and from several workers at once.
pub trait InferenceModel: Send + Sync {
    fn infer(&self, frame: &Frame, confidence: f32) -> Result<Vec<DetectedObject>>;
}

/// Somewhere a model can be loaded from
pub trait ModelSource: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self, model_path: &str) -> Result<Arc<dyn InferenceModel>>;
}

/// Builds a model from a file on disk
pub type ModelFactory = Arc<dyn Fn(&Path) -> Result<Arc<dyn InferenceModel>> + Send + Sync>;
