//! Deterministic extraction backend.
//!
//! Images registered with [`StubExtractor::with_image`] return exactly the
//! faces they were registered with. Any other non-empty payload yields one
//! full-frame face whose embedding is derived from the SHA-256 of the bytes,
//! so the same image always embeds to the same unit vector.

use rollcall_core::{
    sort_largest_first, BoundingBox, DetectedFace, Embedding, ExtractError, FaceExtractor,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

pub const STUB_MODEL_VERSION: &str = "stub-sha256";

pub struct StubExtractor {
    dim: usize,
    known: HashMap<Vec<u8>, Vec<(BoundingBox, Embedding)>>,
    delay: Option<Duration>,
}

impl StubExtractor {
    pub fn new(dim: usize) -> Self {
        Self {
            dim: dim.max(1),
            known: HashMap::new(),
            delay: None,
        }
    }

    /// Register the faces a specific payload contains. An empty list makes
    /// the payload a no-face image.
    pub fn with_image(
        mut self,
        image: impl Into<Vec<u8>>,
        faces: Vec<(BoundingBox, Embedding)>,
    ) -> Self {
        self.known.insert(image.into(), faces);
        self
    }

    /// Sleep before every extraction, to exercise caller timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The embedding an unregistered payload hashes to.
    pub fn hashed_embedding(&self, image: &[u8]) -> Embedding {
        let mut values = Vec::with_capacity(self.dim);
        let mut block = 0u32;
        while values.len() < self.dim {
            let digest = Sha256::new()
                .chain_update(block.to_le_bytes())
                .chain_update(image)
                .finalize();
            values.extend(
                digest
                    .iter()
                    .map(|&byte| f32::from(byte) / 127.5 - 1.0)
                    .take(self.dim - values.len()),
            );
            block += 1;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        Embedding {
            values,
            model_version: Some(STUB_MODEL_VERSION.to_string()),
        }
    }
}

impl FaceExtractor for StubExtractor {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn extract_all(&mut self, image: &[u8]) -> Result<Vec<DetectedFace>, ExtractError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        if let Some(faces) = self.known.get(image) {
            let mut detected: Vec<DetectedFace> = faces
                .iter()
                .map(|(region, embedding)| DetectedFace {
                    region: region.clone(),
                    embedding: embedding.clone(),
                })
                .collect();
            if detected.is_empty() {
                return Err(ExtractError::NoFaceDetected);
            }
            sort_largest_first(&mut detected);
            return Ok(detected);
        }

        if image.is_empty() {
            return Err(ExtractError::NoFaceDetected);
        }

        Ok(vec![DetectedFace {
            embedding: self.hashed_embedding(image),
            region: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 112.0,
                height: 112.0,
                confidence: 1.0,
                landmarks: None,
            },
        }])
    }
}
