//! Optional on-disk visualisation of what the pipeline saw.

use crate::matcher::PersonCandidate;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

const MATCH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const MISS_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Ensure debug output directory exists, creating it if necessary
pub fn ensure_debug_dir(debug_dir: &Path) -> std::io::Result<PathBuf> {
    // Expand ~ to home directory if needed
    let expanded_path = match (debug_dir.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => debug_dir.to_path_buf(),
    };

    std::fs::create_dir_all(&expanded_path)?;
    Ok(expanded_path)
}

/// Debug frame filename with timestamp
pub fn debug_filename(video_stem: &str, frame_number: u64) -> String {
    use chrono::Local;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!(
        "{}_frame{:06}_{}_{}.jpg",
        video_stem,
        frame_number,
        timestamp,
        std::process::id()
    )
}

/// Copy of `frame` with every candidate boxed, green at or above the threshold
pub fn annotate_frame(frame: &RgbImage, candidates: &[&PersonCandidate], threshold: f64) -> RgbImage {
    let mut debug_img = frame.clone();

    for candidate in candidates {
        let bbox = &candidate.bbox;
        if bbox.width() <= 0 || bbox.height() <= 0 {
            continue;
        }
        let rect = Rect::at(bbox.x1, bbox.y1).of_size(bbox.width() as u32, bbox.height() as u32);
        let color = if f64::from(candidate.similarity) >= threshold {
            MATCH_COLOR
        } else {
            MISS_COLOR
        };
        draw_hollow_rect_mut(&mut debug_img, rect, color);
    }

    debug_img
}

/// Writes annotated frames into a debug directory; failures are logged, never raised
pub struct FrameDumper {
    dir: PathBuf,
    video_stem: String,
    threshold: f64,
}

impl FrameDumper {
    pub fn new(output_dir: &Path, video: &Path, threshold: f64) -> Option<Self> {
        let dir = match ensure_debug_dir(output_dir) {
            Ok(dir) => dir,
            Err(e) => {
                log::warn!("Failed to create debug directory: {}", e);
                return None;
            }
        };

        let video_stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());

        Some(Self {
            dir,
            video_stem,
            threshold,
        })
    }

    pub fn save(&self, frame: &RgbImage, frame_number: u64, candidates: &[&PersonCandidate]) {
        if candidates.is_empty() {
            return;
        }

        let path = self.dir.join(debug_filename(&self.video_stem, frame_number));
        let annotated = annotate_frame(frame, candidates, self.threshold);
        match annotated.save(&path) {
            Ok(()) => log::debug!("Debug frame saved: {}", path.display()),
            Err(e) => log::warn!("Failed to save debug frame: {}", e),
        }
    }
}
