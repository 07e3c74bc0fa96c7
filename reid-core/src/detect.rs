use crate::config::DetectionConfig;
use crate::runtime::{OnnxRuntime, RuntimeError};
use image::{imageops, RgbImage};
use ort::session::Session;
use ort::value::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected detector output: {0}")]
    UnexpectedOutput(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// COCO class index for "person"
pub const PERSON_CLASS_ID: u32 = 0;

/// Integer pixel box, corners in (x1, y1, x2, y2) order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Restrict the box to a `width` x `height` image
    pub fn clamp(&self, width: u32, height: u32) -> BoundingBox {
        let w = width as i32;
        let h = height as i32;
        BoundingBox {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }

    pub fn to_array(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: u32,
    pub confidence: f32,
}

impl Detection {
    pub fn is_person(&self) -> bool {
        self.class_id == PERSON_CLASS_ID
    }
}

/// Anything that can find objects in a frame.
///
/// Implementations return every class they know about; callers filter for
/// persons. No ordering of the returned detections is guaranteed.
pub trait PersonDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectionError>;
}

/// Raw proposal in original-frame float coordinates, before NMS
#[derive(Debug, Clone, Copy)]
struct Proposal {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    class_id: u32,
    score: f32,
}

impl Proposal {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Proposal) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    fn into_detection(self) -> Detection {
        Detection {
            // Truncation toward zero, same as casting pixel coordinates to int
            bbox: BoundingBox::new(self.x1 as i32, self.y1 as i32, self.x2 as i32, self.y2 as i32),
            class_id: self.class_id,
            confidence: self.score,
        }
    }
}

/// YOLOv8 detector backed by an ONNX session
pub struct YoloDetector {
    session: Session,
    input_size: u32,
    score_threshold: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    pub fn new(config: &DetectionConfig, runtime: &OnnxRuntime) -> Result<Self, DetectionError> {
        let session = runtime.load_model(&config.model_path)?;

        Ok(Self {
            session,
            input_size: config.input_size,
            score_threshold: config.score_threshold,
            iou_threshold: config.iou_threshold,
        })
    }

    /// Resize to the square network input and lay out as NCHW in [0, 1]
    fn preprocess(&self, image: &RgbImage) -> (([usize; 4], Vec<f32>), f32, f32) {
        let (orig_width, orig_height) = image.dimensions();
        let size = self.input_size;

        let resized = imageops::resize(image, size, size, imageops::FilterType::Triangle);

        let scale_x = orig_width as f32 / size as f32;
        let scale_y = orig_height as f32 / size as f32;

        let mut input_data = Vec::with_capacity((size * size * 3) as usize);
        for c in 0..3 {
            for y in 0..size {
                for x in 0..size {
                    let pixel = resized.get_pixel(x, y);
                    input_data.push(pixel[c] as f32 / 255.0);
                }
            }
        }

        let shape = [1, 3, size as usize, size as usize];
        ((shape, input_data), scale_x, scale_y)
    }
}

impl PersonDetector for YoloDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        let (frame_width, frame_height) = frame.dimensions();
        let (input_tensor, scale_x, scale_y) = self.preprocess(frame);

        let input_value = Value::from_array(input_tensor).map_err(|e| {
            DetectionError::Inference(format!("Failed to create input tensor: {}", e))
        })?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectionError::Inference(format!("Failed to extract output: {}", e)))?;

        if shape.len() != 3 || shape[0] != 1 {
            return Err(DetectionError::UnexpectedOutput(format!(
                "expected [1, 4 + classes, proposals], got {:?}",
                shape
            )));
        }

        // YOLOv8 exports as [1, 84, 8400]; some exporters transpose to [1, 8400, 84]
        let (layout, num_attrs, num_proposals) = if shape[1] <= shape[2] {
            (Layout::AttributeMajor, shape[1] as usize, shape[2] as usize)
        } else {
            (Layout::ProposalMajor, shape[2] as usize, shape[1] as usize)
        };

        let output = RawOutput {
            data,
            layout,
            num_attrs,
            num_proposals,
        };

        let proposals = output.decode(
            self.score_threshold,
            (scale_x, scale_y),
            (frame_width, frame_height),
        )?;
        log::trace!("{} proposals before NMS", proposals.len());

        let detections: Vec<Detection> = nms(proposals, self.iou_threshold)
            .into_iter()
            .map(Proposal::into_detection)
            .collect();

        log::debug!("Detector returned {} boxes", detections.len());
        Ok(detections)
    }
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    AttributeMajor,
    ProposalMajor,
}

/// Borrowed view over the flat YOLO output tensor
struct RawOutput<'a> {
    data: &'a [f32],
    layout: Layout,
    num_attrs: usize,
    num_proposals: usize,
}

impl RawOutput<'_> {
    fn get(&self, proposal: usize, attr: usize) -> f32 {
        match self.layout {
            Layout::AttributeMajor => self.data[attr * self.num_proposals + proposal],
            Layout::ProposalMajor => self.data[proposal * self.num_attrs + attr],
        }
    }

    /// Convert (cx, cy, w, h, class scores...) rows into frame-space proposals
    /// keeping the best class of each row
    fn decode(
        &self,
        score_threshold: f32,
        (scale_x, scale_y): (f32, f32),
        (frame_width, frame_height): (u32, u32),
    ) -> Result<Vec<Proposal>, DetectionError> {
        if self.num_attrs <= 4 {
            return Err(DetectionError::UnexpectedOutput(format!(
                "output has {} attributes per proposal, no class scores",
                self.num_attrs
            )));
        }
        if self.data.len() < self.num_attrs * self.num_proposals {
            return Err(DetectionError::UnexpectedOutput(format!(
                "output holds {} values, expected {}",
                self.data.len(),
                self.num_attrs * self.num_proposals
            )));
        }

        let num_classes = self.num_attrs - 4;
        let mut proposals = Vec::new();

        for i in 0..self.num_proposals {
            let (class_id, score) = (0..num_classes)
                .map(|c| (c, self.get(i, 4 + c)))
                .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

            if score < score_threshold {
                continue;
            }

            let cx = self.get(i, 0);
            let cy = self.get(i, 1);
            let w = self.get(i, 2);
            let h = self.get(i, 3);

            proposals.push(Proposal {
                x1: ((cx - w / 2.0) * scale_x).max(0.0),
                y1: ((cy - h / 2.0) * scale_y).max(0.0),
                x2: ((cx + w / 2.0) * scale_x).min(frame_width as f32),
                y2: ((cy + h / 2.0) * scale_y).min(frame_height as f32),
                class_id: class_id as u32,
                score,
            });
        }

        Ok(proposals)
    }
}

/// Class-aware Non-Maximum Suppression
fn nms(mut proposals: Vec<Proposal>, iou_threshold: f32) -> Vec<Proposal> {
    proposals.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Proposal> = Vec::new();
    for candidate in proposals {
        let suppressed = keep
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}
