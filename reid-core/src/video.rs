//! Video decoding and frame sampling.
//!
//! `FfmpegSource` demuxes and decodes a container into RGB frames;
//! `FrameSampler` walks any `FrameSource` and keeps every Nth frame together
//! with its original index.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, frame, media, software::scaling, Packet};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("Video source unreadable: {0}")]
    SourceUnreadable(String),
    #[error("Video reports an unusable frame rate: {0}")]
    InvalidFrameRate(f64),
    #[error("Sampling interval must be at least 1 frame")]
    InvalidInterval,
}

/// Stream properties known when the source is opened
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub fps: f64,
    /// Frame count reported (or estimated) by the container; 0 when unknown
    pub total_frames: u64,
}

/// A decoded stream of RGB frames in presentation order
pub trait FrameSource {
    fn info(&self) -> VideoInfo;

    /// Next decoded frame, or `None` once the stream is exhausted
    fn next_frame(&mut self) -> Option<Result<RgbImage, VideoError>>;
}

/// One kept frame and its index in the original stream
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub index: u64,
    pub image: RgbImage,
}

impl FrameSample {
    pub fn timestamp(&self, fps: f64) -> f64 {
        self.index as f64 / fps
    }
}

/// Lazy strided iterator over a `FrameSource`.
///
/// Yields every frame whose index is divisible by the interval. The iterator
/// stops for good after the source ends or reports an error.
pub struct FrameSampler<S> {
    source: S,
    info: VideoInfo,
    interval: u64,
    position: u64,
    finished: bool,
}

impl<S: FrameSource> FrameSampler<S> {
    pub fn new(source: S, interval: u64) -> Result<Self, VideoError> {
        if interval == 0 {
            return Err(VideoError::InvalidInterval);
        }

        let info = source.info();
        if !info.fps.is_finite() || info.fps <= 0.0 {
            return Err(VideoError::InvalidFrameRate(info.fps));
        }

        Ok(Self {
            source,
            info,
            interval,
            position: 0,
            finished: false,
        })
    }

    pub fn fps(&self) -> f64 {
        self.info.fps
    }

    pub fn info(&self) -> VideoInfo {
        self.info
    }

    /// Number of frames decoded so far, kept or not
    pub fn frames_read(&self) -> u64 {
        self.position
    }
}

impl<S: FrameSource> Iterator for FrameSampler<S> {
    type Item = Result<FrameSample, VideoError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.source.next_frame() {
                None => {
                    self.finished = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                Some(Ok(image)) => {
                    let index = self.position;
                    self.position += 1;
                    if index % self.interval == 0 {
                        return Some(Ok(FrameSample { index, image }));
                    }
                }
            }
        }
    }
}

/// FFmpeg-backed decoder for the best video stream of a container file
pub struct FfmpegSource {
    input: format::context::Input,
    decoder: ffmpeg::decoder::Video,
    to_rgb: scaling::Context,
    stream_index: usize,
    info: VideoInfo,
    decoded: frame::Video,
    rgb: frame::Video,
    eof_sent: bool,
}

impl FfmpegSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VideoError> {
        let path = path.as_ref();
        ffmpeg::init()
            .map_err(|e| VideoError::SourceUnreadable(format!("failed to initialise FFmpeg: {}", e)))?;

        let input = format::input(&path)
            .map_err(|e| VideoError::SourceUnreadable(format!("{}: {}", path.display(), e)))?;

        let (stream_index, fps, nb_frames, parameters) = {
            let stream = input.streams().best(media::Type::Video).ok_or_else(|| {
                VideoError::SourceUnreadable(format!("{}: no video stream found", path.display()))
            })?;

            let fps = [stream.avg_frame_rate(), stream.rate()]
                .into_iter()
                .find(|r| r.numerator() > 0 && r.denominator() > 0)
                .map(f64::from)
                .unwrap_or(0.0);

            (stream.index(), fps, stream.frames(), stream.parameters())
        };

        // nb_frames is set by most muxers; fall back to duration x fps
        let total_frames = if nb_frames > 0 {
            nb_frames as u64
        } else if input.duration() > 0 && fps > 0.0 {
            let seconds = input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
            (seconds * fps).round() as u64
        } else {
            0
        };

        let decoder = codec::context::Context::from_parameters(parameters)
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| {
                VideoError::SourceUnreadable(format!("failed to open video decoder: {}", e))
            })?;

        let to_rgb = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| VideoError::SourceUnreadable(format!("failed to create RGB scaler: {}", e)))?;

        log::info!(
            "Opened {}: {}x{} @ {:.2} fps, {} frames",
            path.display(),
            decoder.width(),
            decoder.height(),
            fps,
            total_frames
        );

        Ok(Self {
            input,
            decoder,
            to_rgb,
            stream_index,
            info: VideoInfo { fps, total_frames },
            decoded: frame::Video::empty(),
            rgb: frame::Video::empty(),
            eof_sent: false,
        })
    }

    /// Copy the scaled RGB24 plane into a tightly packed image (drops stride padding)
    fn convert_decoded(&mut self) -> Result<RgbImage, VideoError> {
        self.to_rgb
            .run(&self.decoded, &mut self.rgb)
            .map_err(|e| VideoError::SourceUnreadable(format!("RGB conversion failed: {}", e)))?;

        let width = self.rgb.width();
        let height = self.rgb.height();
        let stride = self.rgb.stride(0);
        let row_len = width as usize * 3;
        let raw = self.rgb.data(0);

        let mut data = Vec::with_capacity(row_len * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            data.extend_from_slice(&raw[start..start + row_len]);
        }

        RgbImage::from_raw(width, height, data).ok_or_else(|| {
            VideoError::SourceUnreadable("decoded frame has inconsistent dimensions".to_string())
        })
    }
}

#[derive(Debug)]
enum DecoderState {
    Frame,
    NeedsInput,
    Drained,
    Failed(VideoError),
}

/// Classify a `receive_frame` result; only EAGAIN asks for another packet
fn decoder_state(result: Result<(), ffmpeg::Error>) -> DecoderState {
    match result {
        Ok(()) => DecoderState::Frame,
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
            DecoderState::NeedsInput
        }
        Err(ffmpeg::Error::Eof) => DecoderState::Drained,
        Err(e) => DecoderState::Failed(VideoError::SourceUnreadable(format!(
            "decoder failed: {}",
            e
        ))),
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Option<Result<RgbImage, VideoError>> {
        loop {
            match decoder_state(self.decoder.receive_frame(&mut self.decoded)) {
                DecoderState::Frame => return Some(self.convert_decoded()),
                DecoderState::Drained => return None,
                DecoderState::Failed(e) => return Some(Err(e)),
                DecoderState::NeedsInput if self.eof_sent => return None,
                DecoderState::NeedsInput => {}
            }

            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        return Some(Err(VideoError::SourceUnreadable(format!(
                            "decoder rejected packet: {}",
                            e
                        ))));
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    // Flush frames still buffered in the decoder
                    self.decoder.send_eof().ok();
                    self.eof_sent = true;
                }
                Err(e) => {
                    return Some(Err(VideoError::SourceUnreadable(format!(
                        "failed to read packet: {}",
                        e
                    ))));
                }
            }
        }
    }
}
