//! Process-wide registry sharing one loaded model per model path

use super::{InferenceModel, ModelSource};
use crate::error::{Result, VisionError};
use crate::frame::{DetectedObject, Frame};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// A loaded model shared by every worker using the same model path.
///
/// The confidence threshold is shared as well: changing it through any holder
/// takes effect immediately for all of them.
pub struct ModelHandle {
    model_path: String,
    model: Arc<dyn InferenceModel>,
    confidence: AtomicU32,
}

impl ModelHandle {
    fn new(model_path: &str, model: Arc<dyn InferenceModel>, confidence: f32) -> Self {
        Self {
            model_path: model_path.to_string(),
            model,
            confidence: AtomicU32::new(confidence.to_bits()),
        }
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    pub fn confidence(&self) -> f32 {
        f32::from_bits(self.confidence.load(Ordering::Acquire))
    }

    fn set_confidence(&self, confidence: f32) {
        self.confidence.store(confidence.to_bits(), Ordering::Release);
    }

    /// Run the model at the current shared confidence
    pub fn infer(&self, frame: &Frame) -> Result<Vec<DetectedObject>> {
        self.model.infer(frame, self.confidence())
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_path", &self.model_path)
            .field("confidence", &self.confidence())
            .finish()
    }
}

/// Loads models on first use and hands out the shared instance afterwards
pub struct ModelRegistry {
    local: Arc<dyn ModelSource>,
    remote: Option<Arc<dyn ModelSource>>,
    // One lock around the whole load-or-reuse step: loads are rare and must
    // never race into loading the same path twice.
    handles: Mutex<HashMap<String, Arc<ModelHandle>>>,
}

impl ModelRegistry {
    /// Create a registry that loads from `local`, falling back to `remote`
    pub fn new(local: Arc<dyn ModelSource>, remote: Option<Arc<dyn ModelSource>>) -> Self {
        Self {
            local,
            remote,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Get the shared model for `model_path`, loading it if needed.
    ///
    /// An existing handle is reused and its confidence updated in place.
    pub fn acquire(&self, model_path: &str, confidence: f32) -> Result<Arc<ModelHandle>> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(VisionError::Model(format!("Invalid confidence {}", confidence)));
        }

        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(model_path) {
            handle.set_confidence(confidence);
            info!(model = model_path, confidence, "Reusing shared model");
            return Ok(handle.clone());
        }

        let model = self.load(model_path)?;
        let handle = Arc::new(ModelHandle::new(model_path, model, confidence));
        handles.insert(model_path.to_string(), handle.clone());
        info!(model = model_path, confidence, "Model loaded successfully");
        Ok(handle)
    }

    fn load(&self, model_path: &str) -> Result<Arc<dyn InferenceModel>> {
        info!(model = model_path, source = self.local.name(), "Loading model");
        let local_err = match self.local.load(model_path) {
            Ok(model) => return Ok(model),
            Err(e) => e,
        };
        warn!(model = model_path, "Local model load failed: {}", local_err);

        let Some(remote) = &self.remote else {
            return Err(VisionError::Model(format!(
                "model load failed for {}: {}",
                model_path, local_err
            )));
        };

        info!(model = model_path, source = remote.name(), "Attempting remote model load");
        remote.load(model_path).map_err(|e| {
            VisionError::Model(format!("model load failed for {}: {}", model_path, e))
        })
    }

    /// Shared handle for `model_path`, if loaded
    pub fn get(&self, model_path: &str) -> Option<Arc<ModelHandle>> {
        self.handles.lock().get(model_path).cloned()
    }

    pub fn is_loaded(&self, model_path: &str) -> bool {
        self.handles.lock().contains_key(model_path)
    }

    /// Forget a model. Current holders keep their handle alive; the next
    /// `acquire` loads a fresh instance.
    pub fn evict(&self, model_path: &str) -> bool {
        self.handles.lock().remove(model_path).is_some()
    }
}
