//! Production extraction backend: SCRFD detection + ArcFace embedding.

use crate::arcface::FaceEmbedder;
use crate::scrfd::FaceDetector;
use crate::{arcface_model_path, scrfd_model_path, VisionError};
use rollcall_core::{
    largest_face, sort_largest_first, DetectedFace, ExtractError, FaceExtractor, ProbeFace,
};
use std::path::Path;

pub struct OnnxExtractor {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxExtractor {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, VisionError> {
        let detector = FaceDetector::load(&scrfd_model_path(model_dir))?;
        let embedder = FaceEmbedder::load(&arcface_model_path(model_dir))?;
        Ok(Self { detector, embedder })
    }
}

impl FaceExtractor for OnnxExtractor {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn extract_all(&mut self, image: &[u8]) -> Result<Vec<DetectedFace>, ExtractError> {
        let decoded = image::load_from_memory(image)
            .map_err(VisionError::from)?
            .to_rgb8();

        let regions = self.detector.detect(&decoded)?;
        if regions.is_empty() {
            return Err(ExtractError::NoFaceDetected);
        }
        let mut faces = Vec::with_capacity(regions.len());
        for region in regions {
            let embedding = self.embedder.embed(&decoded, &region)?;
            faces.push(DetectedFace { region, embedding });
        }
        sort_largest_first(&mut faces);
        tracing::debug!(faces = faces.len(), "onnx: embedded every face");
        Ok(faces)
    }

    // Embeds only the largest face, skipping the others.
    fn extract(&mut self, image: &[u8]) -> Result<ProbeFace, ExtractError> {
        let decoded = image::load_from_memory(image)
            .map_err(VisionError::from)?
            .to_rgb8();

        let faces = self.detector.detect(&decoded)?;
        let region = largest_face(&faces).cloned().ok_or(ExtractError::NoFaceDetected)?;
        tracing::debug!(
            faces = faces.len(),
            width = region.width,
            height = region.height,
            confidence = region.confidence,
            "onnx: largest face selected"
        );

        let embedding = self.embedder.embed(&decoded, &region)?;
        Ok(ProbeFace {
            embedding,
            region,
            faces_detected: faces.len(),
        })
    }
}
