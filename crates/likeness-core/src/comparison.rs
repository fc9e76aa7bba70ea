//! Face comparison capability consumed by the similarity scorer.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Same-person verdict from a comparison service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub confidence: f32,
    pub is_identical: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComparisonError {
    /// The account is not approved for verification-type comparisons.
    #[error("face comparison not supported for these credentials: {0}")]
    UnsupportedFeature(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("service found no face in one of the images")]
    NoFaceDetected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid service response: {0}")]
    InvalidResponse(String),
    #[error("no face comparison service configured")]
    NotConfigured,
}

/// A service able to compare two encoded face images.
pub trait FaceComparison: Send + Sync {
    fn compare_faces(
        &self,
        image_a: &[u8],
        image_b: &[u8],
    ) -> impl Future<Output = Result<Comparison, ComparisonError>> + Send;
}

/// Placeholder for deployments without a comparison service.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

impl FaceComparison for Unconfigured {
    async fn compare_faces(
        &self,
        _image_a: &[u8],
        _image_b: &[u8],
    ) -> Result<Comparison, ComparisonError> {
        Err(ComparisonError::NotConfigured)
    }
}
