//! Image container: encoded bytes plus the decoded pixel buffer.

use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageEncoder, RgbImage};
use thiserror::Error;

use crate::validation::{self, ValidationError};

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
    #[error("invalid upload: {0}")]
    Invalid(#[from] ValidationError),
}

/// An image owned by whichever pipeline stage is processing it.
///
/// Stages never mutate an `Image`; crops and resizes produce a new one.
/// Cloning shares the buffers.
#[derive(Debug, Clone)]
pub struct Image {
    bytes: Arc<[u8]>,
    pixels: Arc<DynamicImage>,
}

impl Image {
    /// Pair already-encoded bytes with their decoded pixels.
    pub fn new(bytes: Vec<u8>, pixels: DynamicImage) -> Self {
        Self {
            bytes: bytes.into(),
            pixels: Arc::new(pixels),
        }
    }

    /// Decode any format the `image` crate recognizes.
    pub fn decode(bytes: Vec<u8>) -> Result<Self, ImageError> {
        let pixels =
            image::load_from_memory(&bytes).map_err(|e| ImageError::Decode(e.to_string()))?;
        Ok(Self::new(bytes, pixels))
    }

    /// Validate an untrusted upload, then decode it.
    pub fn from_upload(bytes: Vec<u8>) -> Result<Self, ImageError> {
        validation::validate_upload(&bytes)?;
        Self::decode(bytes)
    }

    /// Encode RGB pixels as JPEG at `quality` (1–100).
    pub fn encode_jpeg(pixels: RgbImage, quality: u8) -> Result<Self, ImageError> {
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
            .write_image(
                pixels.as_raw(),
                pixels.width(),
                pixels.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| ImageError::Encode(e.to_string()))?;
        Ok(Self::new(bytes, DynamicImage::ImageRgb8(pixels)))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}
