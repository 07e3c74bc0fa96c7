//! ONNX Runtime session construction shared by both models.

use crate::config::RuntimeConfig;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("Cannot load model {}: {reason}", .path.display())]
    Session { path: PathBuf, reason: String },
}

/// Builds CPU inference sessions with the configured threading
#[derive(Debug, Clone)]
pub struct OnnxRuntime {
    /// 0 leaves the choice to ONNX Runtime
    intra_threads: usize,
}

impl OnnxRuntime {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            intra_threads: config.intra_threads,
        }
    }

    pub fn intra_threads(&self) -> usize {
        self.intra_threads
    }

    /// Load `model_path` into a ready-to-run session
    pub fn load_model(&self, model_path: &Path) -> Result<Session, RuntimeError> {
        if !model_path.is_file() {
            return Err(RuntimeError::ModelNotFound(model_path.to_path_buf()));
        }

        let mut builder = Session::builder()
            .map_err(session_error(model_path))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(session_error(model_path))?;

        if self.intra_threads > 0 {
            log::debug!("Using {} intra-op threads", self.intra_threads);
            builder = builder
                .with_intra_threads(self.intra_threads)
                .map_err(session_error(model_path))?;
        }

        let session = builder
            .commit_from_file(model_path)
            .map_err(session_error(model_path))?;
        log::info!("Loaded {}", model_path.display());
        Ok(session)
    }
}

fn session_error<E: Display>(path: &Path) -> impl Fn(E) -> RuntimeError + '_ {
    move |e| RuntimeError::Session {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
