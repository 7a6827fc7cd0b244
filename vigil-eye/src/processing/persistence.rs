//! Persisting annotated frames and their detections

use crate::config::RealtimeConfig;
use crate::error::{Result, VisionError};
use crate::frame::{DetectedObject, Frame};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Best-effort sink for sampled frames with detections
pub trait Persistence: Send + Sync {
    fn save(
        &self,
        frame: &Frame,
        detections: &[DetectedObject],
        camera_index: u32,
        frame_number: u64,
    ) -> Result<()>;
}

/// Metadata written next to each saved image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub camera_index: u32,
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
    pub image_path: PathBuf,
    pub object_count: usize,
    pub objects: Vec<ObjectRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub object_name: String,
    pub object_type: u8,
    pub probability: f32,
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl From<&DetectedObject> for ObjectRecord {
    fn from(det: &DetectedObject) -> Self {
        Self {
            object_name: det.class_name.clone(),
            object_type: det.object_type().code(),
            probability: det.confidence,
            x_min: det.x_min(),
            y_min: det.y_min(),
            x_max: det.x_max(),
            y_max: det.y_max(),
        }
    }
}

/// Writes `camera_<idx>/frame_<timestamp>_<n>.jpg` plus a `.json` sidecar
pub struct DiskPersistence {
    root: PathBuf,
}

impl DiskPersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Persist under the configured `output_folder`
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(config.output_folder.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn camera_dir(&self, camera_index: u32) -> PathBuf {
        self.root.join(format!("camera_{}", camera_index))
    }
}

impl Persistence for DiskPersistence {
    fn save(
        &self,
        frame: &Frame,
        detections: &[DetectedObject],
        camera_index: u32,
        frame_number: u64,
    ) -> Result<()> {
        let camera_dir = self.camera_dir(camera_index);
        fs::create_dir_all(&camera_dir)?;

        let timestamp = Utc::now();
        let stem = format!(
            "frame_{}_{}",
            timestamp.format("%Y%m%d_%H%M%S_%6f"),
            frame_number
        );
        let image_path = camera_dir.join(format!("{}.jpg", stem));
        let record_path = camera_dir.join(format!("{}.json", stem));

        let image = image::RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .ok_or_else(|| {
                VisionError::Persistence(format!(
                    "Frame buffer does not match {} dimensions",
                    frame.size_label()
                ))
            })?;
        image.save(&image_path)?;

        let record = FrameRecord {
            camera_index,
            frame_number,
            timestamp,
            image_path: image_path.clone(),
            object_count: detections.len(),
            objects: detections.iter().map(ObjectRecord::from).collect(),
        };
        let writer = BufWriter::new(File::create(&record_path)?);
        serde_json::to_writer_pretty(writer, &record)?;

        debug!(camera = camera_index, frame = frame_number, "Saved frame to {:?}", image_path);
        Ok(())
    }
}
