//! likeness-core — Live-frame vs. ID-photo face matching.
//!
//! Picks the best frame from a live capture burst, normalizes it and the
//! document photo to the same canonical geometry, scores their similarity and
//! maps the score onto a four-band decision.

pub mod comparison;
pub mod config;
pub mod decision;
pub mod detector;
pub mod normalizer;
pub mod photo;
pub mod pipeline;
pub mod quality;
pub mod scorer;
#[cfg(feature = "scrfd")]
pub mod scrfd;
pub mod selector;
pub mod types;
pub mod validation;

pub use comparison::{Comparison, ComparisonError, FaceComparison, Unconfigured};
pub use config::{PipelineConfig, VerificationMode};
pub use decision::{DecisionEngine, Thresholds};
pub use detector::{FaceDetector, HeuristicDetector};
pub use photo::{Image, ImageError};
pub use pipeline::{Pipeline, PipelineError, Verification};
pub use scorer::ScoreMode;
pub use types::{Decision, DetectionResult, Rect, VerificationResult};
