//! Frame quality primitives: face size, sharpness and pose.
//!
//! Each score is normalized to [0, 1] so they can be combined with the
//! weights in [`QualityConfig`].

use image::GrayImage;

use crate::config::QualityConfig;
use crate::types::{Landmarks, Rect};

/// `sqrt(face_area / image_area)`, capped at 1.
///
/// The square root compresses scale so that doubling face coverage does not
/// double the score.
pub fn face_size_score(face: Rect, image_width: u32, image_height: u32) -> f32 {
    let image_area = image_width as u64 * image_height as u64;
    if image_area == 0 {
        return 0.0;
    }
    ((face.area() as f64 / image_area as f64).sqrt() as f32).min(1.0)
}

/// Mean squared response of the discrete Laplacian
/// `4·c − (left + right + top + bottom)` over the interior pixels of `region`.
///
/// Returns 0 for regions smaller than 3×3.
pub fn mean_squared_laplacian(gray: &GrayImage, region: Rect) -> f32 {
    let region = region.clamp_to(gray.width(), gray.height());
    if region.width < 3 || region.height < 3 {
        return 0.0;
    }

    let at = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as f64;
    let mut sum = 0.0f64;
    let mut count = 0u64;

    for y in (region.y + 1)..(region.y + region.height - 1) {
        for x in (region.x + 1)..(region.x + region.width - 1) {
            let lap = 4.0 * at(x, y) - at(x - 1, y) - at(x + 1, y) - at(x, y - 1) - at(x, y + 1);
            sum += lap * lap;
            count += 1;
        }
    }

    (sum / count as f64) as f32
}

/// `min(mean_squared_laplacian / normalization, 1)`.
pub fn sharpness_score(gray: &GrayImage, region: Rect, normalization: f32) -> f32 {
    if normalization <= 0.0 {
        return 0.0;
    }
    (mean_squared_laplacian(gray, region) / normalization).min(1.0)
}

/// `1 − min(|eye_line_angle| / max_tilt, 1)`, or `neutral` without landmarks.
pub fn frontal_score(landmarks: Option<&Landmarks>, max_tilt: f32, neutral: f32) -> f32 {
    match landmarks {
        Some(lm) => 1.0 - (lm.eye_line_angle().abs() / max_tilt).min(1.0),
        None => neutral,
    }
}

/// Weighted sum of the three component scores.
pub fn total_score(config: &QualityConfig, face_size: f32, sharpness: f32, frontal: f32) -> f32 {
    config.face_size_weight * face_size
        + config.sharpness_weight * sharpness
        + config.frontal_weight * frontal
}
