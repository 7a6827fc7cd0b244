//! Frame annotation: bounding boxes and captions

use crate::frame::{DetectedObject, Frame};

/// Produces the variants of a frame that get published and persisted
pub trait FrameAnnotator: Send + Sync {
    /// Frame with detections drawn on it
    fn annotate(&self, frame: &Frame, detections: &[DetectedObject]) -> Frame;

    /// Frame marked with an informational message (no detections)
    fn overlay_info(&self, frame: &Frame, info: &str) -> Frame;
}

/// Draws box outlines into a copy of the pixels; text travels as the caption
#[derive(Debug, Clone)]
pub struct BoxAnnotator {
    pub thickness: u32,
    pub box_color: [u8; 3],
    pub banner_height: u32,
}

impl Default for BoxAnnotator {
    fn default() -> Self {
        Self {
            thickness: 2,
            box_color: [0, 255, 0],
            banner_height: 30,
        }
    }
}

impl FrameAnnotator for BoxAnnotator {
    fn annotate(&self, frame: &Frame, detections: &[DetectedObject]) -> Frame {
        let mut pixels = frame.data().to_vec();
        for detection in detections {
            self.draw_box(&mut pixels, frame.width(), frame.height(), detection);
        }
        frame
            .with_pixels(pixels)
            .with_caption(detection_summary(detections))
    }

    fn overlay_info(&self, frame: &Frame, info: &str) -> Frame {
        let mut pixels = frame.data().to_vec();
        let banner_rows = self.banner_height.min(frame.height()) as usize;
        let row_bytes = frame.width() as usize * 3;
        pixels[..banner_rows * row_bytes].fill(0);
        frame.with_pixels(pixels).with_caption(info)
    }
}

impl BoxAnnotator {
    fn draw_box(&self, pixels: &mut [u8], width: u32, height: u32, detection: &DetectedObject) {
        if width == 0 || height == 0 {
            return;
        }
        let (max_x, max_y) = (width - 1, height - 1);
        let x0 = clamp_coord(detection.x_min(), max_x);
        let x1 = clamp_coord(detection.x_max(), max_x).max(x0);
        let y0 = clamp_coord(detection.y_min(), max_y);
        let y1 = clamp_coord(detection.y_max(), max_y).max(y0);

        for t in 0..self.thickness {
            for x in x0..=x1 {
                if y0 + t <= y1 {
                    put_pixel(pixels, width, x, y0 + t, self.box_color);
                }
                if y1 >= y0 + t {
                    put_pixel(pixels, width, x, y1 - t, self.box_color);
                }
            }
            for y in y0..=y1 {
                if x0 + t <= x1 {
                    put_pixel(pixels, width, x0 + t, y, self.box_color);
                }
                if x1 >= x0 + t {
                    put_pixel(pixels, width, x1 - t, y, self.box_color);
                }
            }
        }
    }
}

fn clamp_coord(value: f32, max: u32) -> u32 {
    if value.is_nan() || value <= 0.0 {
        0
    } else if value >= max as f32 {
        max
    } else {
        value as u32
    }
}

fn put_pixel(pixels: &mut [u8], width: u32, x: u32, y: u32, rgb: [u8; 3]) {
    let offset = (y as usize * width as usize + x as usize) * 3;
    pixels[offset..offset + 3].copy_from_slice(&rgb);
}

/// Per-class counts in first-seen order, e.g. `person: 2 | car: 1`
pub fn detection_summary(detections: &[DetectedObject]) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for detection in detections {
        match counts.iter_mut().find(|(name, _)| *name == detection.class_name) {
            Some((_, count)) => *count += 1,
            None => counts.push((detection.class_name.as_str(), 1)),
        }
    }
    counts
        .iter()
        .map(|(name, count)| format!("{}: {}", name, count))
        .collect::<Vec<_>>()
        .join(" | ")
}
