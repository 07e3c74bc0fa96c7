pub mod compare;
pub mod config;
pub mod debug;
pub mod detect;
pub mod embed;
pub mod matcher;
pub mod rank;
pub mod report;
pub mod runtime;
pub mod video;

#[cfg(test)]
mod testing;

use std::path::Path;

use image::RgbImage;
use thiserror::Error;

use crate::config::{Config, MatchingConfig, MAX_TOP_N};
use crate::debug::FrameDumper;
use crate::detect::{PersonDetector, YoloDetector};
use crate::embed::{Embedding, EmbeddingExtractor, OsnetEmbedder};
use crate::matcher::Matcher;
use crate::rank::TimedCandidate;
use crate::report::VideoSummary;
use crate::video::{FfmpegSource, FrameSampler, FrameSource};

pub use crate::report::{AnalysisResult, BatchEntry, Status};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Detection error: {0}")]
    Detection(#[from] detect::DetectionError),
    #[error("Embedding error: {0}")]
    Embedding(#[from] embed::EmbedError),
    #[error("Video error: {0}")]
    Video(#[from] video::VideoError),
    #[error("Failed to load reference image: {0}")]
    ReferenceImage(#[source] image::ImageError),
    #[error("Failed to encode match image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Per-request knobs chosen by the caller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisParams {
    /// Minimum cosine similarity for a match, in [0, 1]
    pub threshold: f64,
    /// Maximum number of matches returned, in [1, 10]
    pub top_n: usize,
}

impl AnalysisParams {
    pub fn new(threshold: f64, top_n: usize) -> Result<Self, Error> {
        let params = Self { threshold, top_n };
        params.validate()?;
        Ok(params)
    }

    pub fn from_config(config: &MatchingConfig) -> Self {
        Self {
            threshold: config.default_threshold,
            top_n: config.default_top_n,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::InvalidParameter(format!(
                "threshold must be between 0.0 and 1.0, got {}",
                self.threshold
            )));
        }
        if !(1..=MAX_TOP_N).contains(&self.top_n) {
            return Err(Error::InvalidParameter(format!(
                "top_n must be between 1 and {}, got {}",
                MAX_TOP_N, self.top_n
            )));
        }
        Ok(())
    }
}

/// Counters for one analysis run, logged when it finishes
#[derive(Debug, Default)]
struct RunSummary {
    sampled_frames: usize,
    candidates: usize,
    too_small: usize,
    failed_embeddings: usize,
}

/// The matching pipeline: sampler -> matcher -> ranker -> assembler.
///
/// Generic over the two models so either can be swapped without touching the
/// pipeline. Build it once and reuse it for every request.
pub struct Analyzer<D, E> {
    detector: D,
    embedder: E,
    matcher: Matcher,
    frame_interval: u64,
    debug: config::DebugConfig,
}

/// The analyzer wired to the ONNX models named in the configuration
pub type ReidService = Analyzer<YoloDetector, OsnetEmbedder>;

impl ReidService {
    /// Load both models; fails if either cannot be loaded
    pub fn new(config: &Config) -> Result<Self, Error> {
        config.validate()?;
        let runtime = runtime::OnnxRuntime::new(&config.runtime);

        log::info!("Loading person detection model...");
        let detector = YoloDetector::new(&config.detection, &runtime)?;

        log::info!("Loading re-identification model...");
        let embedder = OsnetEmbedder::new(&config.embedding, &runtime)?;

        log::info!("All models loaded");
        Ok(Self::with_models(detector, embedder, config))
    }
}

impl<D: PersonDetector, E: EmbeddingExtractor> Analyzer<D, E> {
    pub fn with_models(detector: D, embedder: E, config: &Config) -> Self {
        Self {
            detector,
            embedder,
            matcher: Matcher::new(&config.matching),
            frame_interval: config.sampling.frame_interval,
            debug: config.debug.clone(),
        }
    }

    /// Run a full request. Every failure becomes an error result.
    pub fn analyze<P, Q>(&mut self, reference_path: P, video_path: Q, params: &AnalysisParams) -> AnalysisResult
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        match self.try_analyze(reference_path, video_path, params) {
            Ok(result) => result,
            Err(e) => {
                log::error!("Analysis failed: {}", e);
                AnalysisResult::error(e.to_string())
            }
        }
    }

    pub fn try_analyze<P, Q>(
        &mut self,
        reference_path: P,
        video_path: Q,
        params: &AnalysisParams,
    ) -> Result<AnalysisResult, Error>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        params.validate()?;
        let reference = self.embed_reference(reference_path)?;
        self.analyze_video(&reference, video_path.as_ref(), params)
    }

    /// Search several videos for the same person; the reference is embedded once.
    ///
    /// A failing video yields an error entry and the rest still run.
    pub fn analyze_batch<P, Q>(
        &mut self,
        reference_path: P,
        video_paths: &[Q],
        params: &AnalysisParams,
    ) -> Vec<BatchEntry>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let video_name = |path: &Q| {
            path.as_ref()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.as_ref().display().to_string())
        };

        let reference = params
            .validate()
            .and_then(|_| self.embed_reference(reference_path));

        let reference = match reference {
            Ok(reference) => reference,
            Err(e) => {
                log::error!("Batch aborted before any video: {}", e);
                let message = e.to_string();
                return video_paths
                    .iter()
                    .map(|path| BatchEntry {
                        video_name: video_name(path),
                        result: AnalysisResult::error(message.clone()),
                    })
                    .collect();
            }
        };

        video_paths
            .iter()
            .map(|path| {
                log::info!("Batch: analyzing {}", path.as_ref().display());
                let result = self
                    .analyze_video(&reference, path.as_ref(), params)
                    .unwrap_or_else(|e| {
                        log::error!("{}: {}", path.as_ref().display(), e);
                        AnalysisResult::error(e.to_string())
                    });
                BatchEntry {
                    video_name: video_name(path),
                    result,
                }
            })
            .collect()
    }

    /// Load a reference image from disk and embed it
    pub fn embed_reference<P: AsRef<Path>>(&mut self, path: P) -> Result<Embedding, Error> {
        let path = path.as_ref();
        log::info!("Loading reference image {}", path.display());
        let image = image::open(path).map_err(Error::ReferenceImage)?.to_rgb8();
        self.embed_image(&image)
    }

    /// Embed an in-memory reference image with the same preprocessing as every crop
    pub fn embed_image(&mut self, image: &RgbImage) -> Result<Embedding, Error> {
        let embedding = self.embedder.embed(image)?;
        log::debug!("Reference embedding has {} dimensions", embedding.len());
        Ok(embedding)
    }

    fn analyze_video(
        &mut self,
        reference: &Embedding,
        video_path: &Path,
        params: &AnalysisParams,
    ) -> Result<AnalysisResult, Error> {
        let source = FfmpegSource::open(video_path)?;

        let dumper = if self.debug.save_frames {
            FrameDumper::new(&self.debug.output_dir, video_path, params.threshold)
        } else {
            None
        };

        self.analyze_source(reference, source, params, dumper.as_ref())
    }

    /// Run the pipeline over an already opened frame source
    pub fn analyze_source<S: FrameSource>(
        &mut self,
        reference: &Embedding,
        source: S,
        params: &AnalysisParams,
        dumper: Option<&FrameDumper>,
    ) -> Result<AnalysisResult, Error> {
        params.validate()?;

        let mut sampler = FrameSampler::new(source, self.frame_interval)?;
        let fps = sampler.fps();
        let mut summary = RunSummary::default();
        let mut candidates = Vec::new();

        log::info!(
            "Sampling every {} frames (threshold={}, top_n={})",
            self.frame_interval,
            params.threshold,
            params.top_n
        );

        for (sample_index, sample) in sampler.by_ref().enumerate() {
            let sample = sample?;
            let frame = self.matcher.match_frame(
                &mut self.detector,
                &mut self.embedder,
                &sample.image,
                reference,
            )?;

            summary.sampled_frames += 1;
            summary.too_small += frame.too_small;
            for failure in frame.failures() {
                log::warn!("Frame {}: {}", sample.index, failure);
                summary.failed_embeddings += 1;
            }

            if let Some(dumper) = dumper {
                let scored: Vec<_> = frame.candidates().collect();
                dumper.save(&sample.image, sample.index, &scored);
            }

            let timestamp = sample.timestamp(fps);
            for candidate in frame.outcomes.into_iter().flatten() {
                log::debug!(
                    "Frame {} ({:.2}s): person at {:?}, similarity {:.4}",
                    sample.index,
                    timestamp,
                    candidate.bbox.to_array(),
                    candidate.similarity
                );
                summary.candidates += 1;
                candidates.push(TimedCandidate {
                    sample_index,
                    frame_number: sample.index,
                    timestamp,
                    candidate,
                });
            }
        }

        let total_frames = sampler.frames_read();
        if sampler.info().total_frames != total_frames {
            log::debug!(
                "Container reported {} frames, decoded {}",
                sampler.info().total_frames,
                total_frames
            );
        }

        log::info!(
            "Processed {} sampled frames: {} persons scored, {} crops too small, {} embeddings failed",
            summary.sampled_frames,
            summary.candidates,
            summary.too_small,
            summary.failed_embeddings
        );

        let ranking = rank::rank(candidates, params.threshold, params.top_n);
        let result = AnalysisResult::assemble(VideoSummary::new(fps, total_frames), ranking)
            .map_err(Error::Encode)?;

        match result.matches.first() {
            Some(best) => log::info!(
                "Found {} matches, top confidence {:.4} at frame {}",
                result.matches.len(),
                best.confidence,
                best.frame_number
            ),
            None => log::info!("No matches found"),
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::testing::{
        paint, person, ColorEmbedder, FixedDetector, ScriptedDetector, VecSource, BLUE, GRAY,
    };
    use image::Rgb;

    const PURE_RED: Rgb<u8> = Rgb([255, 0, 0]);

    fn subject_box() -> BoundingBox {
        BoundingBox::new(40, 20, 90, 140)
    }

    /// 150 frames at 30fps: stranger (blue) in frame 0, subject (red) in frame 90
    fn scenario_source() -> VecSource {
        VecSource::from_fn(150, 30.0, |i| {
            let mut frame = RgbImage::from_pixel(160, 160, GRAY);
            match i {
                0 => paint(&mut frame, subject_box(), BLUE),
                90 => paint(&mut frame, subject_box(), PURE_RED),
                _ => {}
            }
            frame
        })
    }

    /// Sampled frames are 0, 30, 60, 90, 120
    fn scenario_detector() -> ScriptedDetector {
        ScriptedDetector::new(vec![
            vec![person(subject_box(), 0.88)],
            vec![],
            vec![],
            vec![person(subject_box(), 0.91)],
            vec![],
        ])
    }

    fn reference(analyzer: &mut Analyzer<impl PersonDetector, impl EmbeddingExtractor>) -> Embedding {
        analyzer
            .embed_image(&RgbImage::from_pixel(64, 128, PURE_RED))
            .unwrap()
    }

    fn params(threshold: f64, top_n: usize) -> AnalysisParams {
        AnalysisParams::new(threshold, top_n).unwrap()
    }

    #[test]
    fn test_subject_found_at_frame_90() {
        let mut analyzer =
            Analyzer::with_models(scenario_detector(), ColorEmbedder::default(), &Config::default());
        let reference = reference(&mut analyzer);

        let result = analyzer
            .analyze_source(&reference, scenario_source(), &params(0.70, 3), None)
            .unwrap();

        assert_eq!(result.status, Status::Success);
        assert_eq!(result.matches.len(), 1);
        let best = &result.matches[0];
        assert_eq!(best.rank, 1);
        assert_eq!(best.frame_number, 90);
        assert!((best.timestamp_seconds - 3.0).abs() < 1e-9);
        assert_eq!(best.bbox, [40, 20, 90, 140]);
        assert!(best.image_base64.starts_with("data:image/jpeg;base64,"));

        let stats = result.statistics.unwrap();
        assert_eq!(stats.total_detections, 2);
        assert_eq!(stats.matches_found, 1);
        assert!((stats.max_similarity - 1.0).abs() < 1e-5);

        let video = result.video_info.unwrap();
        assert_eq!(video.fps, 30.0);
        assert_eq!(video.total_frames, 150);
        assert!((video.duration_seconds - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_persons_yields_empty_success() {
        let mut analyzer =
            Analyzer::with_models(FixedDetector::new(vec![]), ColorEmbedder::default(), &Config::default());
        let reference = reference(&mut analyzer);

        let result = analyzer
            .analyze_source(&reference, VecSource::blank(90, 30.0), &params(0.7, 3), None)
            .unwrap();

        assert!(result.is_success());
        assert!(result.matches.is_empty());
        let stats = result.statistics.unwrap();
        assert_eq!(stats.total_detections, 0);
        assert_eq!(stats.mean_similarity, 0.0);
        assert_eq!(stats.max_similarity, 0.0);
        assert_eq!(stats.matches_found, 0);
    }

    #[test]
    fn test_empty_video_yields_empty_success() {
        let mut analyzer =
            Analyzer::with_models(FixedDetector::new(vec![]), ColorEmbedder::default(), &Config::default());
        let reference = reference(&mut analyzer);

        let result = analyzer
            .analyze_source(&reference, VecSource::blank(0, 30.0), &params(0.7, 3), None)
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.video_info.unwrap().total_frames, 0);
    }

    #[test]
    fn test_match_invariants_hold() {
        // Every sampled frame shows the same red person
        let detector = FixedDetector::new(vec![
            person(BoundingBox::new(0, 0, 40, 80), 0.9),
            person(BoundingBox::new(60, 0, 100, 80), 0.9),
        ]);
        let source = VecSource::from_fn(300, 30.0, |i| {
            let mut frame = RgbImage::from_pixel(120, 120, GRAY);
            let shade = 255 - (i as u8 % 200);
            paint(&mut frame, BoundingBox::new(0, 0, 40, 80), Rgb([shade, 40, 40]));
            paint(&mut frame, BoundingBox::new(60, 0, 100, 80), BLUE);
            frame
        });

        let mut analyzer = Analyzer::with_models(detector, ColorEmbedder::default(), &Config::default());
        let reference = reference(&mut analyzer);
        let threshold = 0.5;

        let result = analyzer
            .analyze_source(&reference, source, &params(threshold, 3), None)
            .unwrap();

        assert_eq!(result.matches.len(), 3);
        assert!(result
            .matches
            .iter()
            .all(|m| m.confidence >= threshold));
        assert!(result
            .matches
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence));

        let stats = result.statistics.unwrap();
        assert_eq!(stats.matches_found, result.matches.len());
        assert_eq!(stats.total_detections, 20);
        assert!(stats.total_detections >= stats.matches_found);
    }

    #[test]
    fn test_identical_runs_are_identical() {
        let run = || {
            let mut analyzer =
                Analyzer::with_models(scenario_detector(), ColorEmbedder::default(), &Config::default());
            let reference = reference(&mut analyzer);
            analyzer
                .analyze_source(&reference, scenario_source(), &params(0.0, 10), None)
                .unwrap()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_embedding_failure_does_not_abort_video() {
        // Call 1 is the reference; call 2 is the stranger in frame 0
        let mut analyzer = Analyzer::with_models(
            scenario_detector(),
            ColorEmbedder::failing_on(&[2]),
            &Config::default(),
        );
        let reference = reference(&mut analyzer);

        let result = analyzer
            .analyze_source(&reference, scenario_source(), &params(0.7, 3), None)
            .unwrap();

        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].frame_number, 90);
        assert_eq!(result.statistics.unwrap().total_detections, 1);
    }

    #[test]
    fn test_decode_error_is_fatal() {
        let mut analyzer =
            Analyzer::with_models(FixedDetector::new(vec![]), ColorEmbedder::default(), &Config::default());
        let reference = reference(&mut analyzer);

        let result = analyzer.analyze_source(
            &reference,
            VecSource::blank(60, 30.0).with_error_at(45),
            &params(0.7, 3),
            None,
        );
        assert!(matches!(result, Err(Error::Video(_))));
    }

    #[test]
    fn test_zero_fps_is_rejected() {
        let mut analyzer =
            Analyzer::with_models(FixedDetector::new(vec![]), ColorEmbedder::default(), &Config::default());
        let reference = reference(&mut analyzer);

        let result = analyzer.analyze_source(&reference, VecSource::blank(60, 0.0), &params(0.7, 3), None);
        assert!(matches!(result, Err(Error::Video(_))));
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(matches!(
            AnalysisParams::new(1.01, 3),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            AnalysisParams::new(0.7, 0),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            AnalysisParams::new(0.7, 11),
            Err(Error::InvalidParameter(_))
        ));
        assert!(AnalysisParams::new(f64::NAN, 3).is_err());
        assert!(AnalysisParams::new(0.0, 1).is_ok());
        assert!(AnalysisParams::new(1.0, 10).is_ok());
    }

    #[test]
    fn test_pipeline_rechecks_parameters() {
        let mut analyzer =
            Analyzer::with_models(FixedDetector::failing(), ColorEmbedder::default(), &Config::default());
        let reference = reference(&mut analyzer);
        let bogus = AnalysisParams {
            threshold: 0.7,
            top_n: 0,
        };

        // The failing detector is never reached
        let result = analyzer.analyze_source(&reference, VecSource::blank(30, 30.0), &bogus, None);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_unreadable_video_yields_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let reference_path = dir.path().join("reference.png");
        RgbImage::from_pixel(64, 128, PURE_RED)
            .save(&reference_path)
            .unwrap();

        let mut analyzer =
            Analyzer::with_models(FixedDetector::new(vec![]), ColorEmbedder::default(), &Config::default());
        let result = analyzer.analyze(&reference_path, dir.path().join("missing.mp4"), &params(0.7, 3));

        assert_eq!(result.status, Status::Error);
        assert!(result.matches.is_empty());
        assert!(!result.message.unwrap_or_default().is_empty());
    }

    #[test]
    fn test_unreadable_reference_yields_error_result() {
        let mut analyzer =
            Analyzer::with_models(FixedDetector::new(vec![]), ColorEmbedder::default(), &Config::default());
        let result = analyzer.analyze("/nonexistent/ref.jpg", "/nonexistent/video.mp4", &params(0.7, 3));

        assert_eq!(result.status, Status::Error);
        assert!(result.message.unwrap().contains("reference image"));
    }

    #[test]
    fn test_batch_keeps_one_entry_per_video() {
        let dir = tempfile::tempdir().unwrap();
        let reference_path = dir.path().join("reference.png");
        RgbImage::from_pixel(64, 128, PURE_RED)
            .save(&reference_path)
            .unwrap();

        let mut analyzer =
            Analyzer::with_models(FixedDetector::new(vec![]), ColorEmbedder::default(), &Config::default());
        let videos = [dir.path().join("cam1.mp4"), dir.path().join("cam2.mp4")];
        let entries = analyzer.analyze_batch(&reference_path, &videos, &params(0.7, 3));

        let names: Vec<&str> = entries.iter().map(|e| e.video_name.as_str()).collect();
        assert_eq!(names, vec!["cam1.mp4", "cam2.mp4"]);
        assert!(entries.iter().all(|e| e.result.status == Status::Error));
    }

    #[test]
    fn test_batch_with_invalid_params_fails_every_entry() {
        let mut analyzer =
            Analyzer::with_models(FixedDetector::new(vec![]), ColorEmbedder::default(), &Config::default());
        let bogus = AnalysisParams {
            threshold: 2.0,
            top_n: 3,
        };
        let entries = analyzer.analyze_batch("/nonexistent/ref.jpg", &["a.mp4", "b.mp4"], &bogus);

        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .all(|e| e.result.message.as_deref().unwrap_or("").contains("threshold")));
    }
}
