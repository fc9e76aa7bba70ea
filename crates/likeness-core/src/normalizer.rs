//! Face normalization: detect, crop with padding, level the eyes, resize.
//!
//! Produces a square canonical crop (256×256 by default) re-encoded as JPEG,
//! so both sides of a comparison have identical geometry.

use image::imageops::FilterType;
use image::RgbImage;
use thiserror::Error;

use crate::config::NormalizerConfig;
use crate::detector::FaceDetector;
use crate::photo::{Image, ImageError};

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face crop is empty")]
    EmptyCrop,
    #[error(transparent)]
    Encode(#[from] ImageError),
}

pub struct FaceNormalizer<'a, D: ?Sized> {
    detector: &'a D,
    config: &'a NormalizerConfig,
}

impl<'a, D: FaceDetector + ?Sized> FaceNormalizer<'a, D> {
    pub fn new(detector: &'a D, config: &'a NormalizerConfig) -> Self {
        Self { detector, config }
    }

    /// Normalize `image`, or `None` if any step fails. Never returns a
    /// partial image.
    pub fn normalize(&self, image: &Image) -> Option<Image> {
        match self.try_normalize(image) {
            Ok(normalized) => Some(normalized),
            Err(e) => {
                tracing::debug!(stage = "normalize", error = %e, "normalization failed");
                None
            }
        }
    }

    pub fn try_normalize(&self, image: &Image) -> Result<Image, NormalizeError> {
        let detection = self.detector.detect(image.pixels());
        if !detection.detected {
            return Err(NormalizeError::NoFaceDetected);
        }

        let (width, height) = (image.width(), image.height());
        let region = detection
            .bounds
            .clamp_to(width, height)
            .expand(self.config.padding, width, height);
        if region.is_empty() {
            return Err(NormalizeError::EmptyCrop);
        }

        let mut face = image
            .pixels()
            .crop_imm(region.x, region.y, region.width, region.height)
            .to_rgb8();

        if let Some(landmarks) = &detection.landmarks {
            let tilt = landmarks.eye_line_angle().to_degrees();
            if tilt.abs() > self.config.alignment_dead_zone_degrees {
                tracing::debug!(stage = "normalize", tilt_degrees = tilt, "leveling eye line");
                face = rotate_about_center(&face, -tilt);
            }
        }

        let size = self.config.canonical_size;
        let canonical = image::imageops::resize(&face, size, size, FilterType::Triangle);
        Ok(Image::encode_jpeg(canonical, self.config.jpeg_quality)?)
    }
}

/// Rotate `src` by `degrees` about its center, keeping the canvas size.
///
/// A positive angle turns direction vectors toward +y (clockwise on screen).
/// Uses bilinear interpolation; pixels that map outside the source are black.
pub fn rotate_about_center(src: &RgbImage, degrees: f32) -> RgbImage {
    let (w, h) = (src.width(), src.height());
    let mut out = RgbImage::new(w, h);
    if w == 0 || h == 0 {
        return out;
    }

    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = (w as f32 - 1.0) / 2.0;
    let cy = (h as f32 - 1.0) / 2.0;

    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < w as i64 && y >= 0 && y < h as i64 {
            src.get_pixel(x as u32, y as u32).0[c] as f32
        } else {
            0.0
        }
    };

    for (ox, oy, pixel) in out.enumerate_pixels_mut() {
        // Inverse map: source = center + R(-θ)·(output − center)
        let dx = ox as f32 - cx;
        let dy = oy as f32 - cy;
        let sx = cx + cos * dx + sin * dy;
        let sy = cy - sin * dx + cos * dy;

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        for c in 0..3 {
            let v = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, c) * fx * fy;
            pixel.0[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}
