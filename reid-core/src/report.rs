//! Transport-ready analysis results.

use crate::rank::Ranking;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};

const JPEG_QUALITY: u8 = 75;
const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub fps: f64,
    pub total_frames: u64,
    pub duration_seconds: f64,
}

impl VideoSummary {
    pub fn new(fps: f64, total_frames: u64) -> Self {
        Self {
            fps,
            total_frames,
            duration_seconds: total_frames as f64 / fps,
        }
    }
}

/// Aggregates over every scored candidate, not only the returned matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_detections: usize,
    pub mean_similarity: f64,
    pub max_similarity: f64,
    pub matches_found: usize,
}

impl Statistics {
    /// Mean and max skip non-finite scores so both always serialise as numbers
    pub fn from_similarities(similarities: &[f32], matches_found: usize) -> Self {
        let finite: Vec<f64> = similarities
            .iter()
            .map(|s| f64::from(*s))
            .filter(|s| s.is_finite())
            .collect();

        let (mean_similarity, max_similarity) = if finite.is_empty() {
            (0.0, 0.0)
        } else {
            (
                finite.iter().sum::<f64>() / finite.len() as f64,
                finite.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            )
        };

        Self {
            total_detections: similarities.len(),
            mean_similarity,
            max_similarity,
            matches_found,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    /// 1-based position in the ranking
    pub rank: usize,
    pub confidence: f64,
    pub frame_number: u64,
    pub timestamp_seconds: f64,
    pub bbox: [i32; 4],
    pub image_base64: String,
}

impl MatchReport {
    /// Raw JPEG bytes behind `image_base64`
    pub fn image_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        let payload = self
            .image_base64
            .strip_prefix(DATA_URI_PREFIX)
            .unwrap_or(&self.image_base64);
        STANDARD.decode(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_info: Option<VideoSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Statistics>,
    pub matches: Vec<MatchReport>,
}

impl AnalysisResult {
    /// Failed request: a message and no matches, never partial data
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            video_info: None,
            statistics: None,
            matches: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Build the success payload, encoding every match crop as a JPEG data URI
    pub fn assemble(video: VideoSummary, ranking: Ranking) -> Result<Self, image::ImageError> {
        let statistics = Statistics::from_similarities(&ranking.similarities, ranking.matches.len());

        let matches = ranking
            .matches
            .iter()
            .enumerate()
            .map(|(i, m)| {
                Ok(MatchReport {
                    rank: i + 1,
                    confidence: f64::from(m.similarity),
                    frame_number: m.frame_number,
                    timestamp_seconds: m.timestamp,
                    bbox: m.bbox.to_array(),
                    image_base64: encode_data_uri(&m.crop)?,
                })
            })
            .collect::<Result<Vec<_>, image::ImageError>>()?;

        Ok(Self {
            status: Status::Success,
            message: None,
            video_info: Some(video),
            statistics: Some(statistics),
            matches,
        })
    }
}

/// Per-video entry of a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub video_name: String,
    pub result: AnalysisResult,
}

/// JPEG-encode an image and wrap it as a `data:` URI
pub fn encode_data_uri(image: &RgbImage) -> Result<String, image::ImageError> {
    Ok(format!("{}{}", DATA_URI_PREFIX, STANDARD.encode(encode_jpeg(image)?)))
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY).encode_image(image)?;
    Ok(bytes)
}
