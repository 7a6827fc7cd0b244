//! Model sources: a local model directory and an HTTPS download cache

use super::{InferenceModel, ModelFactory, ModelSource};
use crate::error::{Result, VisionError};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const MAX_MODEL_SIZE: u64 = 2_000_000_000; // 2GB max
const MIN_MODEL_SIZE: usize = 1024;
const DOWNLOAD_TIMEOUT_SECS: u64 = 3600;

/// Default cache for downloaded models (`~/.vigil/models`)
pub fn default_model_dir() -> PathBuf {
    dirs::home_dir()
        .map(|mut p| {
            p.push(".vigil");
            p.push("models");
            p
        })
        .unwrap_or_else(|| PathBuf::from("./models"))
}

/// Loads model files that already exist on local disk
pub struct LocalModelSource {
    model_dir: PathBuf,
    factory: ModelFactory,
}

impl LocalModelSource {
    pub fn new(model_dir: impl Into<PathBuf>, factory: ModelFactory) -> Self {
        Self {
            model_dir: model_dir.into(),
            factory,
        }
    }

    fn resolve(&self, model_path: &str) -> PathBuf {
        let path = Path::new(model_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.model_dir.join(path)
        }
    }
}

impl ModelSource for LocalModelSource {
    fn name(&self) -> &str {
        "local"
    }

    fn load(&self, model_path: &str) -> Result<Arc<dyn InferenceModel>> {
        let path = self.resolve(model_path);
        if !path.is_file() {
            return Err(VisionError::Model(format!("Model not found locally: {:?}", path)));
        }
        info!("Loading model from local repository: {:?}", path);
        (self.factory)(path.as_path())
    }
}

/// Downloads model files over HTTPS into a cache directory, then loads them
pub struct HttpModelSource {
    base_url: String,
    cache_dir: PathBuf,
    checksums: HashMap<String, String>,
    factory: ModelFactory,
}

impl HttpModelSource {
    pub fn new(base_url: impl Into<String>, cache_dir: impl Into<PathBuf>, factory: ModelFactory) -> Self {
        Self {
            base_url: base_url.into(),
            cache_dir: cache_dir.into(),
            checksums: HashMap::new(),
            factory,
        }
    }

    /// Require the downloaded `model_name` to hash to `sha256_hex`
    pub fn with_checksum(mut self, model_name: &str, sha256_hex: &str) -> Self {
        self.checksums
            .insert(model_name.to_string(), sha256_hex.to_ascii_lowercase());
        self
    }

    /// Ensure the model file is in the cache, downloading it if needed
    pub fn ensure_model(&self, model_name: &str) -> Result<PathBuf> {
        validate_model_name(model_name)?;
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), model_name);
        validate_url(&url)?;

        if !self.cache_dir.exists() {
            fs::create_dir_all(&self.cache_dir)?;
            info!("Created model directory: {:?}", self.cache_dir);
        }

        let model_path = self.cache_dir.join(model_name);
        if !model_path.starts_with(&self.cache_dir) {
            return Err(VisionError::Model("Path traversal detected".to_string()));
        }
        if model_path.exists() {
            info!("Model {} already exists at {:?}", model_name, model_path);
            return Ok(model_path);
        }

        info!("Downloading model {} from {}", model_name, url);
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()?;
        let response = client.get(&url).send()?;
        if !response.status().is_success() {
            return Err(VisionError::Model(format!(
                "Failed to download model: HTTP {}",
                response.status()
            )));
        }
        if let Some(content_length) = response.content_length() {
            if content_length > MAX_MODEL_SIZE {
                return Err(VisionError::Model(format!(
                    "Model too large: {} bytes (max {} bytes)",
                    content_length, MAX_MODEL_SIZE
                )));
            }
        }

        let bytes = response.bytes()?;
        if bytes.len() as u64 > MAX_MODEL_SIZE {
            return Err(VisionError::Model(format!(
                "Downloaded model too large: {} bytes",
                bytes.len()
            )));
        }
        if bytes.len() < MIN_MODEL_SIZE {
            return Err(VisionError::Model(
                "Downloaded file too small, likely corrupted".to_string(),
            ));
        }
        if let Some(expected) = self.checksums.get(model_name) {
            verify_checksum(model_name, &bytes, expected)?;
        }

        // Write to a temp file first so a partial download never looks complete
        let temp_path = model_path.with_extension("tmp");
        fs::write(&temp_path, &bytes)?;
        fs::rename(&temp_path, &model_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            VisionError::Io(e)
        })?;

        info!("Model {} saved to {:?}", model_name, model_path);
        Ok(model_path)
    }
}

impl ModelSource for HttpModelSource {
    fn name(&self) -> &str {
        "remote"
    }

    fn load(&self, model_path: &str) -> Result<Arc<dyn InferenceModel>> {
        let model_name = Path::new(model_path)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| VisionError::Model(format!("Invalid model path: {}", model_path)))?;
        let path = self.ensure_model(model_name)?;
        (self.factory)(path.as_path())
    }
}

fn validate_model_name(model_name: &str) -> Result<()> {
    if model_name.is_empty() || model_name.len() > 255 {
        return Err(VisionError::Model("Invalid model name".to_string()));
    }
    if model_name.contains("..") || model_name.contains('/') || model_name.contains('\\') {
        return Err(VisionError::Model(
            "Model name contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    if url.len() > 2048 {
        return Err(VisionError::Model("Invalid URL".to_string()));
    }
    if !url.starts_with("https://") {
        return Err(VisionError::Model(
            "Only HTTPS URLs are allowed for model downloads".to_string(),
        ));
    }
    Ok(())
}

fn verify_checksum(model_name: &str, bytes: &[u8], expected: &str) -> Result<()> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let computed = hex::encode(hasher.finalize());
    if computed != expected {
        return Err(VisionError::Model(format!(
            "Checksum mismatch for model {}: expected {}, got {}",
            model_name, expected, computed
        )));
    }
    info!("Verified checksum for model {}", model_name);
    Ok(())
}
