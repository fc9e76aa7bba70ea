//! SCRFD face detector via ONNX Runtime.
//!
//! A model-backed [`FaceDetector`]: letterbox to 640×640, decode the three
//! anchor-free stride heads, suppress overlaps and keep the strongest face.

use std::path::Path;
use std::sync::Mutex;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::detector::FaceDetector;
use crate::types::{DetectionResult, Landmarks, Rect};

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Letterbox placement of the source image inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let input = SCRFD_INPUT_SIZE as f32;
        let scale = (input / width as f32).min(input / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((input - new_w) / 2.0).floor(),
            pad_y: ((input - new_h) / 2.0).floor(),
        }
    }

    /// Map a point from model input space back to source image space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// A decoded face in source image coordinates, before clamping.
#[derive(Debug, Clone)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    landmarks: Option<[(f32, f32); 5]>,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    fn into_detection(self, width: u32, height: u32) -> DetectionResult {
        let x1 = self.x1.max(0.0).round() as u32;
        let y1 = self.y1.max(0.0).round() as u32;
        let x2 = self.x2.max(0.0).round() as u32;
        let y2 = self.y2.max(0.0).round() as u32;
        let bounds = Rect::new(x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
            .clamp_to(width, height);
        if bounds.is_empty() {
            return DetectionResult::none();
        }
        DetectionResult::face(bounds, self.landmarks.map(Landmarks::from_points), self.score)
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-backed face detector. The session is locked per call.
pub struct ScrfdDetector {
    session: Mutex<Session>,
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load an SCRFD ONNX model (e.g. `det_10g.onnx`).
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::info!(path = %model_path.display(), ?stride_indices, "loaded SCRFD model");

        Ok(Self {
            session: Mutex::new(session),
            stride_indices,
        })
    }

    fn infer(&self, gray: &GrayImage) -> Result<Vec<Candidate>, DetectorError> {
        let letterbox = Letterbox::fit(gray.width(), gray.height());
        let input = to_tensor(gray, &letterbox);

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::InferenceFailed("session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data.to_vec())
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "kps")?;
            candidates.extend(decode_stride(&scores, &bboxes, &kps, stride, &letterbox));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&self, image: &DynamicImage) -> DetectionResult {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return DetectionResult::none();
        }

        match self.infer(&image.to_luma8()) {
            Ok(faces) => faces
                .into_iter()
                .next()
                .map(|best| best.into_detection(width, height))
                .unwrap_or_else(DetectionResult::none),
            Err(e) => {
                tracing::warn!(error = %e, "SCRFD inference failed; reporting no face");
                DetectionResult::none()
            }
        }
    }

    fn name(&self) -> &'static str {
        "scrfd"
    }
}

/// Letterbox a grayscale image into a normalized NCHW tensor, replicating the
/// luma channel into all three inputs.
fn to_tensor(gray: &GrayImage, letterbox: &Letterbox) -> Array4<f32> {
    let new_w = ((gray.width() as f32 * letterbox.scale).round() as u32).max(1);
    let new_h = ((gray.height() as f32 * letterbox.scale).round() as u32).max(1);
    let resized = image::imageops::resize(gray, new_w, new_h, FilterType::Triangle);

    let (off_x, off_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    // Padding at the mean normalizes to zero.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + off_x, y as usize + off_y);
        if tx >= SCRFD_INPUT_SIZE || ty >= SCRFD_INPUT_SIZE {
            continue;
        }
        let v = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = v;
        }
    }

    tensor
}

/// Map output tensors to stride slots by name (`score_8`, `bbox_16`, ...),
/// falling back to the positional layout `[scores ×3, bboxes ×3, kps ×3]`.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => {
            tracing::debug!(?names, "SCRFD output names not recognized; using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode the candidates of one stride head above the confidence threshold.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<Candidate> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let step = stride as f32;

    (0..grid_w * grid_h * SCRFD_ANCHORS_PER_CELL)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= SCRFD_CONFIDENCE_THRESHOLD {
                return None;
            }
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * step;
            let ay = (cell / grid_w) as f32 * step;

            let b = bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(ax - b[0] * step, ay - b[1] * step);
            let (x2, y2) = letterbox.unmap(ax + b[2] * step, ay + b[3] * step);

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| {
                    letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step)
                })
            });

            Some(Candidate {
                x1,
                y1,
                x2,
                y2,
                score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by descending score.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Candidate> = Vec::new();
    for c in candidates {
        if keep.iter().all(|k| k.iou(&c) <= iou_threshold) {
            keep.push(c);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x: f32, y: f32, w: f32, h: f32, score: f32) -> Candidate {
        Candidate { x1: x, y1: y, x2: x + w, y2: y + h, score, landmarks: None }
    }

    #[test]
    fn test_iou_partial() {
        let a = candidate(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = candidate(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_strongest_of_overlap() {
        let kept = nms(
            vec![
                candidate(5.0, 5.0, 100.0, 100.0, 0.8),
                candidate(0.0, 0.0, 100.0, 100.0, 0.9),
                candidate(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.4,
        );
        assert_eq!(kept.len(), 2);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
        assert!((kept[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let lb = Letterbox::fit(320, 240);
        let (x, y) = (100.0f32, 50.0f32);
        let (rx, ry) = lb.unmap(x * lb.scale + lb.pad_x, y * lb.scale + lb.pad_y);
        assert!((rx - x).abs() < 0.1 && (ry - y).abs() < 0.1);
    }

    #[test]
    fn test_discover_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_single_anchor() {
        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let cells = (SCRFD_INPUT_SIZE / 32) * (SCRFD_INPUT_SIZE / 32) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0; cells];
        let mut bboxes = vec![0.0; cells * 4];
        let kps = vec![0.0; cells * 10];
        // Anchor index 2 is cell 1 → (32, 0)
        scores[2] = 0.9;
        bboxes[8..12].copy_from_slice(&[0.5, 0.0, 1.0, 2.0]);

        let out = decode_stride(&scores, &bboxes, &kps, 32, &lb);
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert_eq!((c.x1, c.y1, c.x2, c.y2), (16.0, 0.0, 64.0, 64.0));
        assert_eq!(c.landmarks.unwrap()[0], (32.0, 0.0));
    }

    #[test]
    fn test_candidate_into_detection_clamps() {
        let det = candidate(-10.0, -10.0, 60.0, 60.0, 0.9).into_detection(40, 40);
        assert!(det.detected);
        assert_eq!(det.bounds, Rect::new(0, 0, 40, 40));
    }
}
