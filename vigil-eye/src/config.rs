//! Configuration for vigil-eye

use crate::capture::Backend;
use crate::error::{Result, VisionError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Cameras started eagerly by `start_all`; the rest start on demand
    pub max_concurrent_cameras: usize,
    /// Pause between consecutive device opens in `start_all`
    pub camera_startup_delay_ms: u64,
    /// Idle time after which the reaper may stop a camera
    pub inactive_camera_timeout_secs: u64,
    /// Reaper sweep period
    pub reaper_interval_secs: u64,
    /// The reaper never evicts below this many active workers
    pub reaper_floor: usize,
    /// Device indices probed during enumeration (0..max_devices)
    pub max_devices: u32,
    /// Bounded wait for a worker thread to exit on stop
    pub stop_join_timeout_ms: u64,
    /// Per-frame processing settings
    pub realtime: RealtimeConfig,
    /// Device open / read resilience settings
    pub capture: CaptureConfig,
}

/// Per-frame processing settings shared by every camera worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Model identifier handed to the model registry
    pub model_path: String,
    /// Detection confidence threshold (0.0-1.0)
    pub confidence: f32,
    /// Run detection on every Nth frame
    pub save_interval: u64,
    /// Base sleep between frame reads, before throttling
    pub frame_interval_ms: u64,
    /// Keep only these classes (empty keeps everything)
    pub include_classes: Vec<String>,
    /// Drop these classes
    pub exclude_classes: Vec<String>,
    /// Root folder for persisted frames
    pub output_folder: PathBuf,
}

/// Device open / read resilience settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Backends tried in order when opening a device
    pub backends: Vec<Backend>,
    /// Open attempts per backend
    pub attempts_per_backend: u32,
    /// Delay between failed open attempts
    pub retry_delay_ms: u64,
    /// Settle time after releasing a device before it may be reopened
    pub release_settle_ms: u64,
    /// Consecutive read failures tolerated before reconnecting
    pub read_failure_threshold: u32,
    /// Sleep after a failed read
    pub read_retry_delay_ms: u64,
    /// Pause after a successful reconnect before the next read
    pub reconnect_idle_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_cameras: 3,
            camera_startup_delay_ms: 1500,
            inactive_camera_timeout_secs: 300,
            reaper_interval_secs: 60,
            reaper_floor: 2,
            max_devices: 5,
            stop_join_timeout_ms: 10_000,
            realtime: RealtimeConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            model_path: "yolov5n.pt".to_string(),
            confidence: 0.5,
            save_interval: 20,
            frame_interval_ms: 200,
            include_classes: ["person", "car", "truck", "motorcycle", "bicycle", "bus"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_classes: Vec::new(),
            output_folder: PathBuf::from("static/output/realtime_activity"),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backends: vec![Backend::V4l2, Backend::Default],
            attempts_per_backend: 3,
            retry_delay_ms: 1000,
            release_settle_ms: 2000,
            read_failure_threshold: 10,
            read_retry_delay_ms: 100,
            reconnect_idle_ms: 1000,
        }
    }
}

impl CaptureConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn release_settle(&self) -> Duration {
        Duration::from_millis(self.release_settle_ms)
    }

    pub fn read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_delay_ms)
    }

    pub fn reconnect_idle(&self) -> Duration {
        Duration::from_millis(self.reconnect_idle_ms)
    }

    /// Total open attempts before a device is declared unreachable
    pub fn max_open_attempts(&self) -> u32 {
        self.attempts_per_backend
            .saturating_mul(self.backends.len() as u32)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.backends.is_empty() {
            return Err("At least one capture backend is required".to_string());
        }
        if self.attempts_per_backend == 0 || self.attempts_per_backend > 20 {
            return Err("Open attempts per backend must be between 1 and 20".to_string());
        }
        if self.read_failure_threshold == 0 {
            return Err("Read failure threshold must be at least 1".to_string());
        }
        Ok(())
    }
}

impl RealtimeConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.model_path.trim().is_empty() {
            return Err("Model path must not be empty".to_string());
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err("Confidence must be between 0.0 and 1.0".to_string());
        }
        if self.save_interval == 0 {
            return Err("Save interval must be at least 1".to_string());
        }
        Ok(())
    }
}

impl OrchestratorConfig {
    pub fn camera_startup_delay(&self) -> Duration {
        Duration::from_millis(self.camera_startup_delay_ms)
    }

    pub fn inactive_camera_timeout(&self) -> Duration {
        Duration::from_secs(self.inactive_camera_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_devices == 0 || self.max_devices > 64 {
            return Err("Max devices must be between 1 and 64".to_string());
        }
        if self.reaper_floor > 100 {
            return Err("Reaper floor too large (max 100)".to_string());
        }
        if self.reaper_interval_secs == 0 {
            return Err("Reaper interval must be at least 1 second".to_string());
        }
        self.realtime.validate()?;
        self.capture.validate()?;
        Ok(())
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| VisionError::Config(format!("Invalid config: {}", e)))?;
        config.validate().map_err(VisionError::Config)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup, using the deployment's
    /// environment variable names
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAX_CONCURRENT_CAMERAS") {
            self.max_concurrent_cameras = parse_value("MAX_CONCURRENT_CAMERAS", &v)?;
        }
        if let Some(v) = lookup("CAMERA_STARTUP_DELAY") {
            self.camera_startup_delay_ms = parse_seconds_as_ms("CAMERA_STARTUP_DELAY", &v)?;
        }
        if let Some(v) = lookup("INACTIVE_CAMERA_TIMEOUT") {
            self.inactive_camera_timeout_secs = parse_value("INACTIVE_CAMERA_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("YOLO_MODEL_PATH") {
            self.realtime.model_path = v;
        }
        if let Some(v) = lookup("REALTIME_CONFIDENCE") {
            self.realtime.confidence = parse_value("REALTIME_CONFIDENCE", &v)?;
        }
        if let Some(v) = lookup("REALTIME_SAVE_INTERVAL") {
            self.realtime.save_interval = parse_value("REALTIME_SAVE_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("REALTIME_FRAME_RATE") {
            self.realtime.frame_interval_ms = parse_seconds_as_ms("REALTIME_FRAME_RATE", &v)?;
        }
        if let Some(v) = lookup("REALTIME_INCLUDE_CLASSES") {
            self.realtime.include_classes = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = lookup("REALTIME_FOLDER") {
            self.realtime.output_folder = PathBuf::from(v);
        }
        self.validate().map_err(VisionError::Config)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| VisionError::Config(format!("{} has an invalid value: {:?}", key, raw)))
}

fn parse_seconds_as_ms(key: &str, raw: &str) -> Result<u64> {
    let secs: f64 = parse_value(key, raw)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(VisionError::Config(format!("{} must be a non-negative number of seconds", key)));
    }
    Ok((secs * 1000.0).round() as u64)
}
