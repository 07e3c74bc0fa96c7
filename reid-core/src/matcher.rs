use crate::compare::cosine_similarity;
use crate::config::MatchingConfig;
use crate::detect::{BoundingBox, DetectionError, PersonDetector};
use crate::embed::{EmbedError, Embedding, EmbeddingExtractor};
use image::{imageops, RgbImage};
use thiserror::Error;

/// A detected person scored against the reference
#[derive(Debug, Clone)]
pub struct PersonCandidate {
    pub bbox: BoundingBox,
    pub similarity: f32,
    pub crop: RgbImage,
}

/// A person box whose crop could not be embedded
#[derive(Debug, Error)]
#[error("Embedding failed for box {bbox:?}: {source}")]
pub struct CandidateFailure {
    pub bbox: BoundingBox,
    #[source]
    pub source: EmbedError,
}

pub type CandidateOutcome = Result<PersonCandidate, CandidateFailure>;

/// Everything the matcher produced for one frame
#[derive(Debug, Default)]
pub struct FrameMatches {
    /// One entry per person crop that reached the embedder, in detector order
    pub outcomes: Vec<CandidateOutcome>,
    /// Person boxes dropped because the crop was below the minimum size
    pub too_small: usize,
}

impl FrameMatches {
    pub fn candidates(&self) -> impl Iterator<Item = &PersonCandidate> {
        self.outcomes.iter().filter_map(|o| o.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &CandidateFailure> {
        self.outcomes.iter().filter_map(|o| o.as_ref().err())
    }
}

/// Turns one frame into scored person candidates
#[derive(Debug, Clone)]
pub struct Matcher {
    confidence_floor: f32,
    min_crop_size: u32,
}

impl Matcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            confidence_floor: config.confidence_floor,
            min_crop_size: config.min_crop_size,
        }
    }

    /// Detect, crop, embed and score every person in `frame`.
    ///
    /// A detector failure fails the frame. Embedding failures are recorded per
    /// crop and never stop the remaining crops.
    pub fn match_frame<D, E>(
        &self,
        detector: &mut D,
        embedder: &mut E,
        frame: &RgbImage,
        reference: &Embedding,
    ) -> Result<FrameMatches, DetectionError>
    where
        D: PersonDetector + ?Sized,
        E: EmbeddingExtractor + ?Sized,
    {
        let (width, height) = frame.dimensions();
        let detections = detector.detect(frame)?;
        let mut result = FrameMatches::default();

        for detection in detections
            .iter()
            .filter(|d| d.is_person() && d.confidence >= self.confidence_floor)
        {
            let bbox = detection.bbox.clamp(width, height);
            if bbox.width() < self.min_crop_size as i32 || bbox.height() < self.min_crop_size as i32 {
                log::debug!(
                    "Skipping {}x{} person crop at {:?} (minimum {})",
                    bbox.width(),
                    bbox.height(),
                    bbox.to_array(),
                    self.min_crop_size
                );
                result.too_small += 1;
                continue;
            }

            let crop = imageops::crop_imm(
                frame,
                bbox.x1 as u32,
                bbox.y1 as u32,
                bbox.width() as u32,
                bbox.height() as u32,
            )
            .to_image();

            let outcome = embedder
                .embed(&crop)
                .and_then(|embedding| score(reference, &embedding))
                .map(|similarity| PersonCandidate {
                    bbox,
                    similarity,
                    crop,
                })
                .map_err(|source| CandidateFailure { bbox, source });
            result.outcomes.push(outcome);
        }

        Ok(result)
    }
}

/// Similarity to the reference; a NaN or infinite score is a failed crop, never a candidate
fn score(reference: &Embedding, embedding: &Embedding) -> Result<f32, EmbedError> {
    if !embedding.iter().all(|v| v.is_finite()) {
        return Err(EmbedError::NonFinite);
    }
    let similarity = cosine_similarity(reference, embedding);
    if similarity.is_finite() {
        Ok(similarity)
    } else {
        Err(EmbedError::NonFinite)
    }
}
