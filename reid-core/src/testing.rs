//! In-memory stand-ins for the models and the video decoder.

use crate::detect::{BoundingBox, Detection, DetectionError, PersonDetector};
use crate::embed::{EmbedError, Embedding, EmbeddingExtractor};
use crate::video::{FrameSource, VideoError, VideoInfo};
use image::{Rgb, RgbImage};
use ndarray::Array1;
use std::collections::VecDeque;

pub const BLUE: Rgb<u8> = Rgb([20, 20, 220]);
pub const GRAY: Rgb<u8> = Rgb([128, 128, 128]);

pub fn paint(image: &mut RgbImage, bbox: BoundingBox, color: Rgb<u8>) {
    for y in bbox.y1..bbox.y2 {
        for x in bbox.x1..bbox.x2 {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

pub fn person(bbox: BoundingBox, confidence: f32) -> Detection {
    Detection {
        bbox,
        class_id: 0,
        confidence,
    }
}

pub struct VecSource {
    frames: VecDeque<Result<RgbImage, VideoError>>,
    info: VideoInfo,
}

impl VecSource {
    pub fn from_fn(count: u64, fps: f64, f: impl Fn(u64) -> RgbImage) -> Self {
        Self {
            frames: (0..count).map(|i| Ok(f(i))).collect(),
            info: VideoInfo {
                fps,
                total_frames: count,
            },
        }
    }

    pub fn blank(count: u64, fps: f64) -> Self {
        Self::from_fn(count, fps, |_| RgbImage::from_pixel(8, 8, GRAY))
    }

    pub fn with_error_at(mut self, index: usize) -> Self {
        self.frames[index] = Err(VideoError::SourceUnreadable(format!(
            "corrupt packet at frame {}",
            index
        )));
        self
    }
}

impl FrameSource for VecSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Option<Result<RgbImage, VideoError>> {
        self.frames.pop_front()
    }
}

/// Returns the same detections for every frame
pub struct FixedDetector {
    detections: Option<Vec<Detection>>,
}

impl FixedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections: Some(detections),
        }
    }

    pub fn failing() -> Self {
        Self { detections: None }
    }
}

impl PersonDetector for FixedDetector {
    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        self.detections
            .clone()
            .ok_or_else(|| DetectionError::Inference("model exploded".to_string()))
    }
}

/// Returns detections by call order, one entry per sampled frame
pub struct ScriptedDetector {
    script: Vec<Vec<Detection>>,
    calls: usize,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self { script, calls: 0 }
    }
}

impl PersonDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        let detections = self.script.get(self.calls).cloned().unwrap_or_default();
        self.calls += 1;
        Ok(detections)
    }
}

/// Embeds a crop as its mean RGB colour
#[derive(Default)]
pub struct ColorEmbedder {
    /// 1-based call numbers that fail
    fail_on: Vec<usize>,
    pub calls: usize,
}

impl ColorEmbedder {
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            fail_on: calls.to_vec(),
            calls: 0,
        }
    }
}

impl EmbeddingExtractor for ColorEmbedder {
    fn embed(&mut self, crop: &RgbImage) -> Result<Embedding, EmbedError> {
        self.calls += 1;
        if self.fail_on.contains(&self.calls) {
            return Err(EmbedError::Inference("synthetic failure".to_string()));
        }
        if crop.width() == 0 || crop.height() == 0 {
            return Err(EmbedError::EmptyImage);
        }

        let mut sum = [0f32; 3];
        for pixel in crop.pixels() {
            for c in 0..3 {
                sum[c] += pixel[c] as f32;
            }
        }
        let n = (crop.width() * crop.height()) as f32;
        Ok(Array1::from_vec(sum.iter().map(|s| s / n).collect()))
    }
}
