use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Upper bound for the number of matches a caller may request
pub const MAX_TOP_N: usize = 10;
const MAX_INTRA_THREADS: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub detection: DetectionConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub model_path: PathBuf,

    /// Minimum class score a raw proposal needs before NMS
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,

    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Square network input size (YOLOv8 exports use 640)
    #[serde(default = "default_detector_input_size")]
    pub input_size: u32,
}

fn default_score_threshold() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.7
}

fn default_detector_input_size() -> u32 {
    640
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model_path: PathBuf,

    #[serde(default = "default_embedding_width")]
    pub input_width: u32,

    #[serde(default = "default_embedding_height")]
    pub input_height: u32,

    #[serde(default = "default_embedding_dim")]
    pub dimension: usize,

    #[serde(default = "default_mean")]
    pub mean: [f32; 3],

    #[serde(default = "default_std")]
    pub std: [f32; 3],
}

fn default_embedding_width() -> u32 {
    128
}

fn default_embedding_height() -> u32 {
    256
}

fn default_embedding_dim() -> usize {
    512
}

fn default_mean() -> [f32; 3] {
    [0.485, 0.456, 0.406] // ImageNet
}

fn default_std() -> [f32; 3] {
    [0.229, 0.224, 0.225]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Process every Nth frame (30 = one frame per second of 30fps video)
    pub frame_interval: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { frame_interval: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Detector confidence a person box needs before it is cropped and embedded
    pub confidence_floor: f32,
    /// Crops narrower or shorter than this many pixels are discarded
    pub min_crop_size: u32,
    pub default_threshold: f64,
    pub default_top_n: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.3,
            min_crop_size: 20,
            default_threshold: 0.70,
            default_top_n: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Intra-op threads per inference session, 0 lets ONNX Runtime decide
    #[serde(default)]
    pub intra_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    pub save_frames: bool,
    pub output_dir: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            save_frames: false,
            output_dir: PathBuf::from("~/.cache/reid/debug"),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain:
    /// 1. /etc/reid/reid.toml (system-wide)
    /// 2. ~/.config/reid/reid.toml (user)
    /// 3. Compiled defaults
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(config) = Self::load_from_path("/etc/reid/reid.toml") {
            config.validate()?;
            return Ok(config);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user_config = PathBuf::from(home)
                .join(".config")
                .join("reid")
                .join("reid.toml");
            if let Ok(config) = Self::load_from_path(&user_config) {
                config.validate()?;
                return Ok(config);
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from an explicit file
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_path(path)?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.detection.score_threshold) {
            return Err(ConfigError::Validation(
                "Detection score threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.iou_threshold) {
            return Err(ConfigError::Validation(
                "Detection IoU threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.detection.input_size == 0 {
            return Err(ConfigError::Validation(
                "Detector input size must be non-zero".to_string(),
            ));
        }

        if self.embedding.input_width == 0 || self.embedding.input_height == 0 {
            return Err(ConfigError::Validation(
                "Embedding input dimensions must be non-zero".to_string(),
            ));
        }

        if self.embedding.dimension == 0 {
            return Err(ConfigError::Validation(
                "Embedding dimension must be greater than 0".to_string(),
            ));
        }

        if self.embedding.std.iter().any(|s| *s <= 0.0) {
            return Err(ConfigError::Validation(
                "Embedding normalization std values must be positive".to_string(),
            ));
        }

        if self.sampling.frame_interval == 0 {
            return Err(ConfigError::Validation(
                "Frame interval must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.matching.confidence_floor) {
            return Err(ConfigError::Validation(
                "Confidence floor must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.matching.default_threshold) {
            return Err(ConfigError::Validation(
                "Default similarity threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(1..=MAX_TOP_N).contains(&self.matching.default_top_n) {
            return Err(ConfigError::Validation(format!(
                "Default top_n must be between 1 and {}",
                MAX_TOP_N
            )));
        }

        if self.runtime.intra_threads > MAX_INTRA_THREADS {
            return Err(ConfigError::Validation(format!(
                "Intra-op threads must be at most {}",
                MAX_INTRA_THREADS
            )));
        }

        if self.debug.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Debug output directory cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detection: DetectionConfig {
                model_path: PathBuf::from("models/yolov8n.onnx"),
                score_threshold: default_score_threshold(),
                iou_threshold: default_iou_threshold(),
                input_size: default_detector_input_size(),
            },
            embedding: EmbeddingConfig {
                model_path: PathBuf::from("models/osnet_ibn_x1_0.onnx"),
                input_width: default_embedding_width(),
                input_height: default_embedding_height(),
                dimension: default_embedding_dim(),
                mean: default_mean(),
                std: default_std(),
            },
            sampling: SamplingConfig::default(),
            matching: MatchingConfig::default(),
            runtime: RuntimeConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}
