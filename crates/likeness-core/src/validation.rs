//! Upload validation: size and format checks before any decoding happens.

use image::ImageFormat;
use thiserror::Error;

/// Largest accepted upload (50 MiB).
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Container formats the pipeline accepts, sniffed from magic bytes.
pub const SUPPORTED_FORMATS: [ImageFormat; 6] = [
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
    ImageFormat::WebP,
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("upload is empty")]
    Empty,
    #[error("upload is {size} bytes which exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("unrecognized image format")]
    UnknownFormat,
}

/// Check that `bytes` is a non-empty, size-bounded image in a supported format.
pub fn validate_upload(bytes: &[u8]) -> Result<ImageFormat, ValidationError> {
    if bytes.is_empty() {
        return Err(ValidationError::Empty);
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ValidationError::TooLarge {
            size: bytes.len(),
            max: MAX_UPLOAD_BYTES,
        });
    }

    let format = image::guess_format(bytes).map_err(|_| ValidationError::UnknownFormat)?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(ValidationError::UnsupportedFormat(format!("{format:?}")));
    }
    Ok(format)
}

/// Render a byte count as `"12.34 KB"`.
pub fn human_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} TB")
}
