//! Face embeddings, nearest-candidate matching and the extraction seam.
//!
//! Extraction backends (ONNX models, deterministic stub) live in
//! `rollcall-vision`; this module only fixes the contract they satisfy and
//! the math used to compare their output against a course roster.

use crate::error::AttendanceError;
use crate::types::StudentId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Pick the face occupying the largest region; detector confidence breaks ties.
///
/// Multi-face probes are resolved with this policy rather than rejected.
pub fn largest_face(faces: &[BoundingBox]) -> Option<&BoundingBox> {
    faces.iter().max_by(|a, b| {
        a.area()
            .total_cmp(&b.area())
            .then(a.confidence.total_cmp(&b.confidence))
    })
}

/// Face embedding vector of fixed dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Always processes all dimensions.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    pub fn distance(&self, other: &Embedding, metric: DistanceMetric) -> f32 {
        match metric {
            DistanceMetric::Euclidean => self.euclidean_distance(other),
            DistanceMetric::Cosine => 1.0 - self.similarity(other),
        }
    }
}

/// How two embeddings are compared. Smaller distance = more similar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    /// `1 - cosine similarity`, in [0, 2].
    Cosine,
}

impl FromStr for DistanceMetric {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "euclidean" => Ok(Self::Euclidean),
            "cosine" => Ok(Self::Cosine),
            other => Err(AttendanceError::Validation(format!(
                "unknown distance metric `{other}`"
            ))),
        }
    }
}

/// Map a distance onto a [0, 100] confidence, decreasing with distance.
pub fn confidence_for(distance: f32, max_distance: f32) -> f32 {
    if max_distance <= 0.0 || !distance.is_finite() {
        return 0.0;
    }
    (100.0 * (1.0 - distance / max_distance)).clamp(0.0, 100.0)
}

/// Confidence corresponding to the acceptance threshold. A match must score
/// strictly above this value.
pub fn confidence_floor(threshold: f32, max_distance: f32) -> f32 {
    confidence_for(threshold, max_distance)
}

/// A roster member's reference embedding.
#[derive(Debug, Clone)]
pub struct FaceCandidate {
    pub student_id: StudentId,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against roster candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest comparable candidate, if any.
    pub distance: Option<f32>,
    /// Nearest candidate when `matched`.
    pub student_id: Option<StudentId>,
    /// Candidates actually compared (same dimension as the probe).
    pub compared: usize,
}

/// Strategy for comparing a probe embedding against candidate embeddings.
pub trait Matcher {
    fn nearest(&self, probe: &Embedding, candidates: &[FaceCandidate], threshold: f32)
        -> MatchResult;
}

/// Minimum-distance matcher with full candidate traversal.
///
/// Always visits every candidate so that timing does not depend on where the
/// best match sits in the roster.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestMatcher {
    pub metric: DistanceMetric,
}

impl NearestMatcher {
    pub fn new(metric: DistanceMetric) -> Self {
        Self { metric }
    }
}

impl Matcher for NearestMatcher {
    fn nearest(
        &self,
        probe: &Embedding,
        candidates: &[FaceCandidate],
        threshold: f32,
    ) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;
        let mut compared = 0usize;

        for (i, candidate) in candidates.iter().enumerate() {
            if candidate.embedding.dim() != probe.dim() {
                tracing::warn!(
                    student_id = candidate.student_id,
                    expected = probe.dim(),
                    actual = candidate.embedding.dim(),
                    "skipping candidate with mismatched embedding dimension"
                );
                continue;
            }
            compared += 1;
            let dist = probe.distance(&candidate.embedding, self.metric);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < threshold => MatchResult {
                matched: true,
                distance: Some(best_dist),
                student_id: Some(candidates[idx].student_id),
                compared,
            },
            Some(_) => MatchResult {
                matched: false,
                distance: Some(best_dist),
                student_id: None,
                compared,
            },
            None => MatchResult {
                matched: false,
                distance: None,
                student_id: None,
                compared,
            },
        }
    }
}

/// The face chosen from a probe image, with its embedding.
#[derive(Debug, Clone)]
pub struct ProbeFace {
    pub embedding: Embedding,
    pub region: BoundingBox,
    /// Number of faces the backend detected before the largest was chosen.
    pub faces_detected: usize,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("extraction backend failed: {0}")]
    Backend(String),
}

/// One detected face with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub region: BoundingBox,
    pub embedding: Embedding,
}

/// Embedding extraction capability.
///
/// Implementations run on a dedicated worker thread and may hold
/// non-`Sync` model sessions, hence `&mut self`.
pub trait FaceExtractor: Send {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Detect and embed every face in an encoded image, largest first.
    /// An image without faces is `NoFaceDetected`, never an empty list.
    fn extract_all(&mut self, image: &[u8]) -> Result<Vec<DetectedFace>, ExtractError>;

    /// Detect faces in an encoded image and embed the largest one.
    fn extract(&mut self, image: &[u8]) -> Result<ProbeFace, ExtractError> {
        let mut faces = self.extract_all(image)?;
        sort_largest_first(&mut faces);
        let faces_detected = faces.len();
        let largest = faces.into_iter().next().ok_or(ExtractError::NoFaceDetected)?;
        Ok(ProbeFace {
            embedding: largest.embedding,
            region: largest.region,
            faces_detected,
        })
    }
}

/// Order faces largest first, detector confidence breaking ties.
pub fn sort_largest_first(faces: &mut [DetectedFace]) {
    faces.sort_by(|a, b| {
        b.region
            .area()
            .total_cmp(&a.region.area())
            .then(b.region.confidence.total_cmp(&a.region.confidence))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn candidate(id: StudentId, values: &[f32]) -> FaceCandidate {
        FaceCandidate {
            student_id: id,
            embedding: emb(values),
        }
    }

    fn bbox(w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x: 0.0,
            y: 0.0,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_cosine_distance_opposite() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[-1.0, 0.0]);
        assert!((a.distance(&b, DistanceMetric::Cosine) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_matcher_visits_all_candidates() {
        // Best match is the last entry.
        let probe = emb(&[1.0, 0.0, 0.0]);
        let roster = vec![
            candidate(1, &[0.0, 1.0, 0.0]),
            candidate(2, &[0.0, 0.0, 1.0]),
            candidate(3, &[0.9, 0.1, 0.0]),
        ];
        let result = NearestMatcher::default().nearest(&probe, &roster, 0.6);
        assert!(result.matched);
        assert_eq!(result.student_id, Some(3));
        assert_eq!(result.compared, 3);
    }

    #[test]
    fn test_distance_below_threshold_is_recognized() {
        let probe = emb(&[0.0, 0.0]);
        let roster = vec![candidate(7, &[0.59, 0.0])];
        let result = NearestMatcher::default().nearest(&probe, &roster, 0.6);
        assert!(result.matched);
        assert_eq!(result.student_id, Some(7));
    }

    #[test]
    fn test_distance_at_threshold_is_rejected() {
        let probe = emb(&[0.0, 0.0]);
        let roster = vec![candidate(7, &[0.5, 0.0])];
        let result = NearestMatcher::default().nearest(&probe, &roster, 0.5);
        assert!(!result.matched);
        assert_eq!(result.student_id, None);
        assert!((result.distance.unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_dimensions_are_skipped() {
        let probe = emb(&[0.0, 0.0]);
        let roster = vec![candidate(1, &[0.0, 0.0, 0.0]), candidate(2, &[0.1, 0.0])];
        let result = NearestMatcher::default().nearest(&probe, &roster, 0.6);
        assert_eq!(result.compared, 1);
        assert_eq!(result.student_id, Some(2));
    }

    #[test]
    fn test_empty_roster_has_no_distance() {
        let result = NearestMatcher::default().nearest(&emb(&[1.0]), &[], 0.6);
        assert!(!result.matched);
        assert_eq!(result.distance, None);
        assert_eq!(result.compared, 0);
    }

    #[test]
    fn test_confidence_decreases_with_distance() {
        let mut prev = f32::INFINITY;
        for step in 0..12 {
            let c = confidence_for(step as f32 * 0.1, 1.0);
            assert!(c <= prev);
            assert!((0.0..=100.0).contains(&c));
            prev = c;
        }
        assert_eq!(confidence_for(0.0, 1.0), 100.0);
        assert_eq!(confidence_for(1.5, 1.0), 0.0);
        assert!((confidence_floor(0.6, 1.0) - 40.0).abs() < 1e-4);
    }

    fn detected(size: f32, conf: f32, values: &[f32]) -> DetectedFace {
        DetectedFace {
            region: bbox(size, size, conf),
            embedding: emb(values),
        }
    }

    struct Fixed(Vec<DetectedFace>);

    impl FaceExtractor for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn extract_all(&mut self, _image: &[u8]) -> Result<Vec<DetectedFace>, ExtractError> {
            if self.0.is_empty() {
                return Err(ExtractError::NoFaceDetected);
            }
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_sort_largest_first() {
        let mut faces = vec![
            detected(20.0, 0.9, &[1.0]),
            detected(80.0, 0.5, &[2.0]),
            detected(80.0, 0.8, &[3.0]),
        ];
        sort_largest_first(&mut faces);
        let order: Vec<f32> = faces.iter().map(|f| f.embedding.values[0]).collect();
        assert_eq!(order, vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_default_extract_keeps_largest() {
        let mut backend = Fixed(vec![detected(30.0, 0.9, &[1.0]), detected(90.0, 0.9, &[2.0])]);
        let probe = backend.extract(b"img").unwrap();
        assert_eq!(probe.faces_detected, 2);
        assert_eq!(probe.embedding, emb(&[2.0]));
        assert_eq!(Fixed(vec![]).extract(b"img").unwrap_err(), ExtractError::NoFaceDetected);
    }

    #[test]
    fn test_largest_face_policy() {
        let faces = vec![bbox(40.0, 40.0, 0.99), bbox(120.0, 110.0, 0.7), bbox(60.0, 60.0, 0.9)];
        let chosen = largest_face(&faces).unwrap();
        assert_eq!(chosen.width, 120.0);
        assert!(largest_face(&[]).is_none());
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }
}
