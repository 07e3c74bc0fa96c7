use crate::detect::BoundingBox;
use crate::matcher::PersonCandidate;
use image::RgbImage;

/// A candidate located in time
#[derive(Debug, Clone)]
pub struct TimedCandidate {
    /// Position of the frame among the sampled frames
    pub sample_index: usize,
    /// Index of the frame in the original video
    pub frame_number: u64,
    pub timestamp: f64,
    pub candidate: PersonCandidate,
}

/// A candidate that cleared the similarity threshold
#[derive(Debug, Clone)]
pub struct Match {
    pub sample_index: usize,
    pub frame_number: u64,
    pub timestamp: f64,
    pub similarity: f32,
    pub bbox: BoundingBox,
    pub crop: RgbImage,
}

impl From<TimedCandidate> for Match {
    fn from(timed: TimedCandidate) -> Self {
        Self {
            sample_index: timed.sample_index,
            frame_number: timed.frame_number,
            timestamp: timed.timestamp,
            similarity: timed.candidate.similarity,
            bbox: timed.candidate.bbox,
            crop: timed.candidate.crop,
        }
    }
}

#[derive(Debug, Default)]
pub struct Ranking {
    /// Similarity of every candidate, in encounter order
    pub similarities: Vec<f32>,
    /// Best matches first, at most top-N
    pub matches: Vec<Match>,
}

/// Threshold, order and truncate candidates gathered across the whole video.
///
/// The threshold is compared against the widened score, the same value that is
/// reported as the match confidence. Sorting is stable so equal scores keep
/// encounter order. NaN never passes the threshold.
pub fn rank(candidates: Vec<TimedCandidate>, threshold: f64, top_n: usize) -> Ranking {
    let similarities: Vec<f32> = candidates.iter().map(|c| c.candidate.similarity).collect();

    let mut matches: Vec<Match> = candidates
        .into_iter()
        .filter(|c| f64::from(c.candidate.similarity) >= threshold)
        .map(Match::from)
        .collect();

    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(top_n);

    Ranking {
        similarities,
        matches,
    }
}
