//! Confidence-banded decision policy.
//!
//! Maps a same-person confidence onto four bands. Each band's lower bound is
//! inclusive:
//!
//! ```text
//! [auto_accept, 1.0]      AutoAccept
//! [accept, auto_accept)   Accept
//! [retry, accept)         Retry
//! [0.0, retry)            Reject
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{Decision, VerificationResult};

const MESSAGE_AUTO_ACCEPT: &str = "Identity verified.";
const MESSAGE_ACCEPT: &str = "Identity verified; this check may be reviewed.";
const MESSAGE_RETRY: &str =
    "We could not confirm your identity. Please retake the photo facing the camera in good light.";
const MESSAGE_REJECT: &str = "The live photo does not match the document photo.";

/// Lower bounds of the Retry, Accept and AutoAccept bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub auto_accept: f32,
    pub accept: f32,
    pub retry: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auto_accept: 0.80,
            accept: 0.60,
            retry: 0.45,
        }
    }
}

impl Thresholds {
    /// `(auto_accept, accept, retry)`.
    pub fn as_tuple(&self) -> (f32, f32, f32) {
        (self.auto_accept, self.accept, self.retry)
    }
}

/// Pure, total mapping from confidence to [`VerificationResult`].
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    thresholds: Thresholds,
}

impl DecisionEngine {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Classify `confidence`. NaN is treated as 0; values outside [0, 1] are clamped.
    pub fn decide(&self, confidence: f32) -> VerificationResult {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        let t = &self.thresholds;

        let (decision, message) = if confidence >= t.auto_accept {
            (Decision::AutoAccept, MESSAGE_AUTO_ACCEPT)
        } else if confidence >= t.accept {
            (Decision::Accept, MESSAGE_ACCEPT)
        } else if confidence >= t.retry {
            (Decision::Retry, MESSAGE_RETRY)
        } else {
            (Decision::Reject, MESSAGE_REJECT)
        };

        VerificationResult {
            is_identical: decision.is_identical(),
            confidence,
            decision,
            message: message.to_string(),
        }
    }
}

/// Classify with the default thresholds.
pub fn decide(confidence: f32) -> VerificationResult {
    DecisionEngine::default().decide(confidence)
}

/// Default `(auto_accept, accept, retry)` thresholds.
pub fn thresholds() -> (f32, f32, f32) {
    Thresholds::default().as_tuple()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [f32; 12] = [
        0.0, 0.30, 0.44, 0.45, 0.55, 0.59, 0.60, 0.70, 0.79, 0.80, 0.85, 1.0,
    ];

    #[test]
    fn test_band_boundaries_exact() {
        for c in SAMPLES {
            let expected = if c >= 0.80 {
                Decision::AutoAccept
            } else if c >= 0.60 {
                Decision::Accept
            } else if c >= 0.45 {
                Decision::Retry
            } else {
                Decision::Reject
            };
            assert_eq!(decide(c).decision, expected, "confidence {c}");
        }
    }

    #[test]
    fn test_boundary_values() {
        assert_eq!(decide(0.80).decision, Decision::AutoAccept);
        assert_eq!(decide(0.60).decision, Decision::Accept);
        assert_eq!(decide(0.45).decision, Decision::Retry);
        assert_eq!(decide(0.4499).decision, Decision::Reject);
    }

    #[test]
    fn test_is_identical_tracks_decision() {
        for i in 0..=100 {
            let r = decide(i as f32 / 100.0);
            assert_eq!(
                r.is_identical,
                matches!(r.decision, Decision::Accept | Decision::AutoAccept)
            );
        }
    }

    #[test]
    fn test_monotonic() {
        let mut prev = Decision::Reject;
        for i in 0..=1000 {
            let d = decide(i as f32 / 1000.0).decision;
            assert!(d >= prev, "decision dropped at {}", i as f32 / 1000.0);
            prev = d;
        }
    }

    #[test]
    fn test_every_band_has_message() {
        for i in 0..=100 {
            assert!(!decide(i as f32 / 100.0).message.is_empty());
        }
    }

    #[test]
    fn test_out_of_range_is_total() {
        assert_eq!(decide(f32::NAN).decision, Decision::Reject);
        assert_eq!(decide(-1.0).confidence, 0.0);
        assert_eq!(decide(7.0).decision, Decision::AutoAccept);
    }

    #[test]
    fn test_thresholds_queryable() {
        assert_eq!(thresholds(), (0.80, 0.60, 0.45));
        let engine = DecisionEngine::new(Thresholds {
            auto_accept: 0.9,
            accept: 0.7,
            retry: 0.5,
        });
        assert_eq!(engine.thresholds().as_tuple(), (0.9, 0.7, 0.5));
        assert_eq!(engine.decide(0.85).decision, Decision::Accept);
    }
}
