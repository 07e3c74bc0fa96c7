use crate::config::EmbeddingConfig;
use crate::runtime::{OnnxRuntime, RuntimeError};
use image::{imageops, RgbImage};
use ndarray::Array1;
use ort::session::Session;
use ort::value::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Invalid embedding dimension, expected {expected} but got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
    #[error("Cannot embed an empty image")]
    EmptyImage,
    #[error("Embedding contains non-finite values")]
    NonFinite,
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Raw appearance feature vector produced by the re-identification network
pub type Embedding = Array1<f32>;

/// Anything that turns a person crop of arbitrary size into a fixed-length vector.
///
/// The same extractor instance must be used for the reference image and all
/// candidates; scores across different preprocessing are not comparable.
pub trait EmbeddingExtractor {
    fn embed(&mut self, crop: &RgbImage) -> Result<Embedding, EmbedError>;
}

/// Canonical resize + per-channel normalization applied before the network
#[derive(Debug, Clone)]
pub struct Preprocessor {
    width: u32,
    height: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Preprocessor {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            width: config.input_width,
            height: config.input_height,
            mean: config.mean,
            std: config.std,
        }
    }

    /// Converts any RGB image to an NCHW `[1, 3, height, width]` tensor
    pub fn tensor(&self, image: &RgbImage) -> Result<([usize; 4], Vec<f32>), EmbedError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EmbedError::EmptyImage);
        }

        let resized = imageops::resize(image, self.width, self.height, imageops::FilterType::CatmullRom);

        let mut input_data = Vec::with_capacity((self.width * self.height * 3) as usize);
        for c in 0..3 {
            for y in 0..self.height {
                for x in 0..self.width {
                    let pixel = resized.get_pixel(x, y);
                    let value = (pixel[c] as f32 / 255.0 - self.mean[c]) / self.std[c];
                    input_data.push(value);
                }
            }
        }

        Ok((
            [1, 3, self.height as usize, self.width as usize],
            input_data,
        ))
    }
}

/// OSNet-style re-identification embedder backed by an ONNX session
pub struct OsnetEmbedder {
    session: Session,
    preprocessor: Preprocessor,
    dimension: usize,
}

impl OsnetEmbedder {
    pub fn new(config: &EmbeddingConfig, runtime: &OnnxRuntime) -> Result<Self, EmbedError> {
        let session = runtime.load_model(&config.model_path)?;

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(config),
            dimension: config.dimension,
        })
    }
}

impl EmbeddingExtractor for OsnetEmbedder {
    fn embed(&mut self, crop: &RgbImage) -> Result<Embedding, EmbedError> {
        let input_tensor = self.preprocessor.tensor(crop)?;

        let input_value = Value::from_array(input_tensor)
            .map_err(|e| EmbedError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| EmbedError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::Inference(format!("Failed to extract embedding: {}", e)))?;

        // Expect [1, D]
        let actual = shape.last().copied().unwrap_or(0) as usize;
        if shape.len() != 2 || actual != self.dimension || data.len() < self.dimension {
            return Err(EmbedError::InvalidDimension {
                expected: self.dimension,
                actual,
            });
        }

        finite_embedding(data[..self.dimension].to_vec())
    }
}

/// Wrap raw network output, rejecting NaN or infinite components
pub fn finite_embedding(values: Vec<f32>) -> Result<Embedding, EmbedError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(Array1::from_vec(values))
    } else {
        Err(EmbedError::NonFinite)
    }
}
