//! Pre-fetch a detection model into the local model cache

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vigil_eye::models::sources::default_model_dir;
use vigil_eye::models::{HttpModelSource, InferenceModel};
use vigil_eye::VisionError;

const DEFAULT_BASE_URL: &str = "https://github.com/ultralytics/yolov5/releases/download/v7.0";

fn main() -> Result<(), VisionError> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: fetch_model <model_file> [sha256]");
        eprintln!("Environment: VIGIL_MODEL_BASE_URL, VIGIL_MODEL_DIR");
        std::process::exit(1);
    }

    let model_name = &args[1];
    let base_url = env::var("VIGIL_MODEL_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let cache_dir = env::var("VIGIL_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_model_dir());

    // Download only; nothing is loaded here
    let mut source = HttpModelSource::new(
        base_url,
        cache_dir,
        Arc::new(|path: &Path| -> Result<Arc<dyn InferenceModel>, VisionError> {
            Err(VisionError::Model(format!("{:?} is not loaded by fetch_model", path)))
        }),
    );
    if let Some(checksum) = args.get(2) {
        source = source.with_checksum(model_name, checksum);
    }

    println!("Fetching model {}...", model_name);
    let path = source.ensure_model(model_name)?;
    println!("Model available at: {:?}", path);
    Ok(())
}
