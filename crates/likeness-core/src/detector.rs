//! Face detection capability and the self-contained heuristic detector.

use image::DynamicImage;

use crate::types::{DetectionResult, Landmarks, Point, Rect};

// Assumed face geometry, as fractions of the image.
const FACE_WIDTH_FRACTION: f32 = 0.60;
const FACE_HEIGHT_FRACTION: f32 = 0.70;
const FACE_TOP_FRACTION: f32 = 0.15;

// Landmark rows/columns, as fractions of the face box.
const EYE_ROW: f32 = 0.35;
const NOSE_ROW: f32 = 0.55;
const MOUTH_ROW: f32 = 0.75;
const LEFT_EYE_COLUMN: f32 = 0.30;
const RIGHT_EYE_COLUMN: f32 = 0.70;
const NOSE_COLUMN: f32 = 0.50;
const MOUTH_LEFT_COLUMN: f32 = 0.35;
const MOUTH_RIGHT_COLUMN: f32 = 0.65;

/// Fixed confidence reported by the heuristic detector, which performs no
/// pixel analysis.
pub const HEURISTIC_CONFIDENCE: f32 = 0.85;

/// Pluggable face detection backend.
///
/// Implementations must not fail for a structurally valid image: internal
/// errors and zero-size inputs are reported as [`DetectionResult::none`].
pub trait FaceDetector: Send + Sync {
    /// Detect the most prominent face in `image`.
    fn detect(&self, image: &DynamicImage) -> DetectionResult;

    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;
}

impl<T: FaceDetector + ?Sized> FaceDetector for Box<T> {
    fn detect(&self, image: &DynamicImage) -> DetectionResult {
        (**self).detect(image)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Assumes a centered, upright face occupying most of the frame.
///
/// Keeps the pipeline functional with no model or service available. The box
/// and landmarks are derived from the image dimensions alone, so accuracy
/// depends entirely on the user framing their face as instructed.
#[derive(Debug, Clone)]
pub struct HeuristicDetector {
    confidence: f32,
}

impl Default for HeuristicDetector {
    fn default() -> Self {
        Self {
            confidence: HEURISTIC_CONFIDENCE,
        }
    }
}

impl HeuristicDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assumed face box for a `width` × `height` image.
    pub fn assumed_bounds(width: u32, height: u32) -> Rect {
        let (w, h) = (width as f32, height as f32);
        let face_w = (w * FACE_WIDTH_FRACTION).round() as u32;
        let face_h = (h * FACE_HEIGHT_FRACTION).round() as u32;
        let x = ((w - face_w as f32) / 2.0).round().max(0.0) as u32;
        let y = (h * FACE_TOP_FRACTION).round() as u32;
        Rect::new(x, y, face_w, face_h).clamp_to(width, height)
    }

    /// Landmarks placed algebraically inside `bounds`.
    pub fn assumed_landmarks(bounds: Rect) -> Landmarks {
        let at = |col: f32, row: f32| {
            Point::new(
                bounds.x as f32 + bounds.width as f32 * col,
                bounds.y as f32 + bounds.height as f32 * row,
            )
        };
        Landmarks {
            left_eye: at(LEFT_EYE_COLUMN, EYE_ROW),
            right_eye: at(RIGHT_EYE_COLUMN, EYE_ROW),
            nose_tip: at(NOSE_COLUMN, NOSE_ROW),
            mouth_left: at(MOUTH_LEFT_COLUMN, MOUTH_ROW),
            mouth_right: at(MOUTH_RIGHT_COLUMN, MOUTH_ROW),
        }
    }
}

impl FaceDetector for HeuristicDetector {
    fn detect(&self, image: &DynamicImage) -> DetectionResult {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return DetectionResult::none();
        }

        let bounds = Self::assumed_bounds(width, height);
        if bounds.is_empty() {
            return DetectionResult::none();
        }

        DetectionResult::face(bounds, Some(Self::assumed_landmarks(bounds)), self.confidence)
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assumed_bounds_640x480() {
        let b = HeuristicDetector::assumed_bounds(640, 480);
        assert_eq!(b, Rect::new(128, 72, 384, 336));
    }

    #[test]
    fn test_detect_reports_fixed_confidence() {
        let img = DynamicImage::new_rgb8(200, 200);
        let det = HeuristicDetector::new().detect(&img);
        assert!(det.detected);
        assert!((det.confidence - HEURISTIC_CONFIDENCE).abs() < 1e-6);
    }

    #[test]
    fn test_landmarks_are_level_and_ordered() {
        let img = DynamicImage::new_rgb8(300, 400);
        let det = HeuristicDetector::new().detect(&img);
        let lm = det.landmarks.unwrap();
        assert!(lm.left_eye.x < lm.right_eye.x);
        assert_eq!(lm.left_eye.y, lm.right_eye.y);
        assert!(lm.left_eye.y < lm.nose_tip.y);
        assert!(lm.nose_tip.y < lm.mouth_left.y);
    }

    #[test]
    fn test_eye_row_position() {
        let b = Rect::new(0, 100, 100, 200);
        let lm = HeuristicDetector::assumed_landmarks(b);
        assert!((lm.left_eye.y - 170.0).abs() < 1e-4);
        assert!((lm.nose_tip.y - 210.0).abs() < 1e-4);
        assert!((lm.mouth_right.y - 250.0).abs() < 1e-4);
    }

    #[test]
    fn test_zero_size_image_not_detected() {
        let img = DynamicImage::new_rgb8(0, 0);
        assert!(!HeuristicDetector::new().detect(&img).detected);
    }

    #[test]
    fn test_boxed_detector_delegates() {
        let boxed: Box<dyn FaceDetector> = Box::new(HeuristicDetector::new());
        assert_eq!(boxed.name(), "heuristic");
        assert!(boxed.detect(&DynamicImage::new_rgb8(10, 10)).detected);
    }
}
