//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB probe into the 640x640 model input, decodes the three
//! anchor-free stride heads (scores, box distances, keypoints) and suppresses
//! overlapping boxes with greedy NMS.

use crate::VisionError;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::BoundingBox;
use std::path::Path;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

/// Scale and offset applied when fitting the probe into the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    pub(crate) fn fit(width: u32, height: u32) -> (Self, u32, u32) {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let letterbox = Self {
            scale,
            offset_x: (INPUT_SIZE - new_w) / 2,
            offset_y: (INPUT_SIZE - new_h) / 2,
        };
        (letterbox, new_w, new_h)
    }

    /// Map a point in model-input space back to probe coordinates.
    pub(crate) fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

/// Output tensor positions for one stride: (scores, boxes, keypoints).
type HeadIndices = (usize, usize, usize);

pub struct FaceDetector {
    session: Session,
    heads: [HeadIndices; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, VisionError> {
        if !model_path.exists() {
            return Err(VisionError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 9 {
            return Err(VisionError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (3 strides x score/bbox/kps), model has {}",
                names.len()
            )));
        }

        let heads = head_indices(&names);
        tracing::info!(path = %model_path.display(), ?heads, "loaded SCRFD model");

        Ok(Self { session, heads })
    }

    /// Detect faces, strongest first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, VisionError> {
        let (input, letterbox) = preprocess(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let (score_at, box_at, kps_at) = self.heads[slot];
            let head = |idx: usize, what: &'static str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| VisionError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = head(score_at, "scores")?;
            let boxes = head(box_at, "boxes")?;
            let kps = head(kps_at, "keypoints")?;
            candidates.extend(decode_head(scores, boxes, kps, stride, &letterbox));
        }

        Ok(non_max_suppression(candidates, NMS_IOU))
    }
}

/// Letterbox the probe into a normalized NCHW tensor.
///
/// Padding stays at zero, which is where the mean pixel normalizes to.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (letterbox, new_w, new_h) = Letterbox::fit(image.width(), image.height());
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let side = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + letterbox.offset_x) as usize;
        let ty = (y + letterbox.offset_y) as usize;
        for channel in 0..3 {
            tensor[[0, channel, ty, tx]] = (pixel[channel] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    (tensor, letterbox)
}

/// Locate the score/bbox/kps tensors for each stride.
///
/// Exports that name their heads `score_8`, `bbox_16`, `kps_32`, ... are
/// mapped by name; anything else uses the insightface positional order
/// (scores 0-2, boxes 3-5, keypoints 6-8).
fn head_indices(names: &[String]) -> [HeadIndices; 3] {
    let position = |kind: &str, stride: u32| {
        names.iter().position(|name| {
            name.split_once('_')
                .is_some_and(|(k, s)| k == kind && s.parse::<u32>().ok() == Some(stride))
        })
    };

    let mut heads = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
    for (slot, &stride) in STRIDES.iter().enumerate() {
        match (position("score", stride), position("bbox", stride), position("kps", stride)) {
            (Some(s), Some(b), Some(k)) => heads[slot] = (s, b, k),
            _ => {
                tracing::debug!(?names, "SCRFD head names not recognized, using positional layout");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    heads
}

/// Decode one stride head into probe-space boxes above the score threshold.
fn decode_head(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: u32,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let cells_per_row = (INPUT_SIZE / stride) as usize;
    let step = stride as f32;

    scores
        .iter()
        .enumerate()
        .filter(|&(_, &score)| score > SCORE_THRESHOLD)
        .filter_map(|(anchor, &score)| {
            let cell = anchor / ANCHORS_PER_CELL;
            let ax = (cell % cells_per_row) as f32 * step;
            let ay = (cell / cells_per_row) as f32 * step;

            let d = boxes.get(anchor * 4..anchor * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(ax - d[0] * step, ay - d[1] * step);
            let (x2, y2) = letterbox.unmap(ax + d[2] * step, ay + d[3] * step);

            let landmarks = kps.get(anchor * 10..anchor * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy NMS: keep the strongest box, drop anything overlapping a kept box.
fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_limit: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_limit) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let overlap_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let overlap_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = overlap_w * overlap_h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}
