//! rollcall-vision: face embedding backends.
//!
//! Two interchangeable [`FaceExtractor`] implementations, chosen by
//! configuration: the ONNX pipeline (SCRFD detection, ArcFace recognition)
//! and a deterministic stub used for tests and demo deployments.

pub mod arcface;
pub mod onnx;
pub mod scrfd;
pub mod stub;

use rollcall_core::{ExtractError, FaceExtractor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use onnx::OnnxExtractor;
pub use stub::StubExtractor;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("model file not found: {0} (download from insightface and place in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; the detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<VisionError> for ExtractError {
    fn from(err: VisionError) -> Self {
        ExtractError::Backend(err.to_string())
    }
}

/// Which extraction backend to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Onnx,
    #[default]
    Stub,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onnx" => Ok(Self::Onnx),
            "stub" => Ok(Self::Stub),
            other => Err(format!("unknown face backend `{other}`")),
        }
    }
}

/// Model location plus stub dimension.
#[derive(Debug, Clone)]
pub struct BackendSpec {
    pub kind: BackendKind,
    pub model_dir: PathBuf,
    pub embedding_dim: usize,
}

/// Path to the SCRFD detection model inside `model_dir`.
pub fn scrfd_model_path(model_dir: &Path) -> PathBuf {
    model_dir.join("det_10g.onnx")
}

/// Path to the ArcFace recognition model inside `model_dir`.
pub fn arcface_model_path(model_dir: &Path) -> PathBuf {
    model_dir.join("w600k_r50.onnx")
}

/// Instantiate the configured backend. Fails fast if ONNX models are missing.
pub fn open_backend(spec: &BackendSpec) -> Result<Box<dyn FaceExtractor>, VisionError> {
    match spec.kind {
        BackendKind::Onnx => {
            let extractor = OnnxExtractor::load(&spec.model_dir)?;
            Ok(Box::new(extractor))
        }
        BackendKind::Stub => Ok(Box::new(StubExtractor::new(spec.embedding_dim))),
    }
}
