//! ArcFace face recognizer via ONNX Runtime.
//!
//! Aligns the detected face to the canonical 112x112 ArcFace crop with a
//! least-squares similarity transform over the five landmarks, then runs the
//! w600k_r50 model and L2-normalizes the 512-dim output.

use crate::VisionError;
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{BoundingBox, Embedding};
use std::path::Path;

const CROP_SIZE: u32 = 112;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5; // symmetric, unlike SCRFD
const EMBEDDING_DIM: usize = 512;
pub const MODEL_VERSION: &str = "w600k_r50";

/// Landmark positions of the canonical ArcFace 112x112 crop.
const CANONICAL_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// 4-DOF similarity transform `p' = [a -b; b a] p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit mapping `src` onto `dst`.
    pub(crate) fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let centroid = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / 5.0, sy / 5.0)
        };
        let (scx, scy) = centroid(src);
        let (dcx, dcy) = centroid(dst);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy, dx, dy) = (sx - scx, sy - scy, dx - dcx, dy - dcy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }

        if norm <= f32::EPSILON {
            // Degenerate landmarks: translate only.
            return Self { a: 1.0, b: 0.0, tx: dcx - scx, ty: dcy - scy };
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: dcx - (a * scx - b * scy),
            ty: dcy - (b * scx + a * scy),
        }
    }

    pub(crate) fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    pub(crate) fn inverse(&self) -> Self {
        let det = self.a * self.a + self.b * self.b;
        let (a, b) = (self.a / det, -self.b / det);
        Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        }
    }
}

/// Warp the face described by `landmarks` into the canonical crop.
pub(crate) fn align(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let to_source = Similarity::estimate(landmarks, &CANONICAL_LANDMARKS).inverse();
    RgbImage::from_fn(CROP_SIZE, CROP_SIZE, |x, y| {
        let (sx, sy) = to_source.apply((x as f32, y as f32));
        sample_bilinear(image, sx, sy)
    })
}

/// Bilinear sample; black outside the image.
fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    if x < 0.0 || y < 0.0 || x > w - 1.0 || y > h - 1.0 {
        return Rgb([0, 0, 0]);
    }
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(image.width() - 1), (y0 + 1).min(image.height() - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let corners = [
        (image.get_pixel(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (image.get_pixel(x1, y0), fx * (1.0 - fy)),
        (image.get_pixel(x0, y1), (1.0 - fx) * fy),
        (image.get_pixel(x1, y1), fx * fy),
    ];
    let mut out = [0u8; 3];
    for (channel, slot) in out.iter_mut().enumerate() {
        let value: f32 = corners.iter().map(|(p, wgt)| p[channel] as f32 * wgt).sum();
        *slot = value.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn to_tensor(crop: &RgbImage) -> Array4<f32> {
    let side = CROP_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for channel in 0..3 {
            tensor[[0, channel, y as usize, x as usize]] =
                (pixel[channel] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}

fn l2_normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
    values
}

pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    pub fn load(model_path: &Path) -> Result<Self, VisionError> {
        if !model_path.exists() {
            return Err(VisionError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Embed one detected face. The face must carry landmarks.
    pub fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, VisionError> {
        let landmarks = face.landmarks.as_ref().ok_or(VisionError::NoLandmarks)?;
        let input = to_tensor(&align(image, landmarks));

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::InferenceFailed(format!("embedding output: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(VisionError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw.to_vec()),
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-3 && (a.1 - b.1).abs() < 1e-3
    }

    #[test]
    fn test_estimate_recovers_known_transform() {
        let truth = Similarity { a: 0.8, b: 0.3, tx: 12.0, ty: -4.0 };
        let src = [(10.0, 20.0), (60.0, 22.0), (35.0, 45.0), (15.0, 70.0), (55.0, 72.0)];
        let dst = src.map(|p| truth.apply(p));
        let fitted = Similarity::estimate(&src, &dst);
        for p in src {
            assert!(close(fitted.apply(p), truth.apply(p)));
        }
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = Similarity { a: 1.7, b: -0.4, tx: 30.0, ty: 8.0 };
        let inv = t.inverse();
        let p = (42.0, -13.0);
        assert!(close(inv.apply(t.apply(p)), p));
    }

    #[test]
    fn test_canonical_landmarks_map_to_identity() {
        let fitted = Similarity::estimate(&CANONICAL_LANDMARKS, &CANONICAL_LANDMARKS);
        assert!(close(fitted.apply((5.0, 9.0)), (5.0, 9.0)));
    }

    #[test]
    fn test_align_uniform_image_stays_uniform() {
        let image = RgbImage::from_pixel(400, 400, Rgb([90, 120, 150]));
        // Face twice the canonical size, offset into the frame.
        let landmarks = CANONICAL_LANDMARKS.map(|(x, y)| (x * 2.0 + 50.0, y * 2.0 + 40.0));
        let crop = align(&image, &landmarks);
        assert_eq!(crop.dimensions(), (CROP_SIZE, CROP_SIZE));
        assert_eq!(*crop.get_pixel(56, 56), Rgb([90, 120, 150]));
    }

    #[test]
    fn test_sample_outside_is_black() {
        let image = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        assert_eq!(sample_bilinear(&image, -1.0, 3.0), Rgb([0, 0, 0]));
        assert_eq!(sample_bilinear(&image, 4.5, 4.5), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_tensor_normalization() {
        let crop = RgbImage::from_pixel(CROP_SIZE, CROP_SIZE, Rgb([255, 0, 128]));
        let tensor = to_tensor(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
