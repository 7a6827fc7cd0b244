//! Frames and detection results

use crate::error::{Result, VisionError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A captured RGB8 frame.
///
/// Pixel data lives in a reference-counted buffer, so cloning a frame for the
/// "latest frame" slot does not copy pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Bytes,
    caption: Option<String>,
    captured_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap packed RGB8 pixels, checking the buffer matches the dimensions
    pub fn from_rgb(width: u32, height: u32, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(3))
            .ok_or_else(|| VisionError::Processing("Frame dimensions overflow".to_string()))?;
        if width == 0 || height == 0 {
            return Err(VisionError::Processing("Frame dimensions must be non-zero".to_string()));
        }
        if data.len() != expected {
            return Err(VisionError::Processing(format!(
                "Frame buffer is {} bytes, expected {} for {}x{} RGB",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            caption: None,
            captured_at: Utc::now(),
        })
    }

    /// A single-colour frame
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data: Bytes::from(data),
            caption: None,
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// `WxH`
    pub fn size_label(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Same frame metadata over a new pixel buffer
    pub(crate) fn with_pixels(&self, data: Vec<u8>) -> Self {
        Self {
            width: self.width,
            height: self.height,
            data: Bytes::from(data),
            caption: self.caption.clone(),
            captured_at: self.captured_at,
        }
    }
}

/// Detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: (f32, f32, f32, f32), // x, y, width, height
}

impl DetectedObject {
    pub fn x_min(&self) -> f32 {
        self.bbox.0
    }

    pub fn y_min(&self) -> f32 {
        self.bbox.1
    }

    pub fn x_max(&self) -> f32 {
        self.bbox.0 + self.bbox.2
    }

    pub fn y_max(&self) -> f32 {
        self.bbox.1 + self.bbox.3
    }

    pub fn object_type(&self) -> ObjectType {
        ObjectType::from_name(&self.class_name)
    }
}

/// Numeric object type codes stored alongside persisted detections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectType {
    Unknown = 0,
    Person = 1,
    Car = 2,
    Truck = 3,
    Bus = 4,
    Motorcycle = 5,
    Bicycle = 6,
    Dog = 7,
    Cat = 8,
}

impl ObjectType {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "person" => ObjectType::Person,
            "car" => ObjectType::Car,
            "truck" => ObjectType::Truck,
            "bus" => ObjectType::Bus,
            "motorcycle" => ObjectType::Motorcycle,
            "bicycle" => ObjectType::Bicycle,
            "dog" => ObjectType::Dog,
            "cat" => ObjectType::Cat,
            _ => ObjectType::Unknown,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgb_checks_length() {
        assert!(Frame::from_rgb(2, 2, vec![0u8; 12]).is_ok());
        assert!(Frame::from_rgb(2, 2, vec![0u8; 11]).is_err());
        assert!(Frame::from_rgb(0, 2, Vec::<u8>::new()).is_err());
    }

    #[test]
    fn test_solid_frame() {
        let frame = Frame::solid(3, 2, [1, 2, 3]);
        assert_eq!(frame.data().len(), 18);
        assert_eq!(&frame.data()[..6], &[1, 2, 3, 1, 2, 3]);
        assert_eq!(frame.size_label(), "3x2");
        assert!(frame.caption().is_none());
    }

    #[test]
    fn test_object_type_codes() {
        assert_eq!(ObjectType::from_name("Person").code(), 1);
        assert_eq!(ObjectType::from_name("cat").code(), 8);
        assert_eq!(ObjectType::from_name("giraffe"), ObjectType::Unknown);
    }

    #[test]
    fn test_detected_object_corners() {
        let det = DetectedObject {
            class_id: 0,
            class_name: "person".to_string(),
            confidence: 0.9,
            bbox: (10.0, 20.0, 30.0, 40.0),
        };
        assert_eq!(det.x_max(), 40.0);
        assert_eq!(det.y_max(), 60.0);
        assert_eq!(det.object_type(), ObjectType::Person);
    }
}
