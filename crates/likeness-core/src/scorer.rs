//! Similarity scoring with a configurable local fallback.
//!
//! In `ExternalService` mode the comparison service is authoritative. The
//! local path is a seeded placeholder (base confidence, symmetric jitter and a
//! size-difference penalty) and is always logged with `mode = "simulated"`.

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::comparison::{ComparisonError, FaceComparison};
use crate::config::{ScorerConfig, SimulationConfig, VerificationMode};
use crate::photo::Image;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    External,
    Simulated,
}

impl std::fmt::Display for ScoreMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ScoreMode::External => "external",
            ScoreMode::Simulated => "simulated",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    /// Same-person confidence in [0, 1].
    pub confidence: f32,
    pub mode: ScoreMode,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoreError {
    /// The service cannot be used and the fallback policy forbids the local
    /// score. A deployment problem, not a capture problem.
    #[error("face comparison unavailable and local fallback disabled: {0}")]
    FallbackDisabled(ComparisonError),
    #[error("face comparison failed: {0}")]
    Comparison(ComparisonError),
}

pub struct SimilarityScorer<C> {
    comparison: Option<C>,
    config: ScorerConfig,
    rng: Mutex<StdRng>,
}

impl<C: FaceComparison> SimilarityScorer<C> {
    pub fn new(comparison: Option<C>, config: ScorerConfig) -> Self {
        Self {
            comparison,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Make the local fallback reproducible.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn mode(&self) -> VerificationMode {
        self.config.mode
    }

    /// Score two normalized faces.
    pub async fn score(&self, a: &Image, b: &Image) -> Result<Score, ScoreError> {
        let score = match self.config.mode {
            VerificationMode::Simulated => self.simulate(a.bytes(), b.bytes()),
            VerificationMode::ExternalService => self.score_external(a.bytes(), b.bytes()).await?,
        };

        tracing::info!(
            stage = "score",
            mode = %score.mode,
            confidence = score.confidence,
            "similarity scored"
        );
        Ok(score)
    }

    async fn score_external(&self, a: &[u8], b: &[u8]) -> Result<Score, ScoreError> {
        let Some(comparison) = &self.comparison else {
            return self.fall_back(ComparisonError::NotConfigured, a, b);
        };

        match comparison.compare_faces(a, b).await {
            Ok(result) => Ok(Score {
                confidence: sanitize(result.confidence),
                mode: ScoreMode::External,
            }),
            Err(ComparisonError::NoFaceDetected) => {
                tracing::info!(stage = "score", "comparison service found no face; scoring 0");
                Ok(Score {
                    confidence: 0.0,
                    mode: ScoreMode::External,
                })
            }
            Err(e @ ComparisonError::UnsupportedFeature(_)) => self.fall_back(e, a, b),
            Err(e) => {
                tracing::error!(stage = "score", error = %e, "face comparison failed");
                Err(ScoreError::Comparison(e))
            }
        }
    }

    fn fall_back(&self, reason: ComparisonError, a: &[u8], b: &[u8]) -> Result<Score, ScoreError> {
        if !self.config.fallback_on_unsupported {
            tracing::error!(
                stage = "score",
                error = %reason,
                "comparison unavailable and fallback disabled"
            );
            return Err(ScoreError::FallbackDisabled(reason));
        }
        tracing::warn!(
            stage = "score",
            error = %reason,
            "comparison unavailable; using simulated score"
        );
        Ok(self.simulate(a, b))
    }

    fn simulate(&self, a: &[u8], b: &[u8]) -> Score {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Score {
            confidence: simulated_confidence(
                &self.config.simulation,
                a.len(),
                b.len(),
                &mut *rng,
            ),
            mode: ScoreMode::Simulated,
        }
    }
}

/// Placeholder confidence: `base ± jitter − weight · |len_a − len_b| / max(len_a, len_b)`,
/// clamped to [0, 1]. Non-finite jitter is ignored and a NaN result scores 0.
pub fn simulated_confidence<R: Rng + ?Sized>(
    config: &SimulationConfig,
    len_a: usize,
    len_b: usize,
    rng: &mut R,
) -> f32 {
    let jitter = if config.jitter.is_finite() && config.jitter > 0.0 {
        rng.gen_range(-config.jitter..=config.jitter)
    } else {
        0.0
    };
    let larger = len_a.max(len_b);
    let size_difference = if larger == 0 {
        0.0
    } else {
        len_a.abs_diff(len_b) as f32 / larger as f32
    };
    sanitize(config.base_confidence + jitter - config.size_difference_weight * size_difference)
}

fn sanitize(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparison::{Comparison, Unconfigured};
    use image::{DynamicImage, RgbImage};

    struct Fixed(Result<Comparison, ComparisonError>);

    impl FaceComparison for Fixed {
        async fn compare_faces(&self, _a: &[u8], _b: &[u8]) -> Result<Comparison, ComparisonError> {
            self.0.clone()
        }
    }

    fn image_of_len(len: usize) -> Image {
        Image::new(vec![0u8; len], DynamicImage::ImageRgb8(RgbImage::new(1, 1)))
    }

    fn external(fallback: bool) -> ScorerConfig {
        ScorerConfig {
            mode: VerificationMode::ExternalService,
            fallback_on_unsupported: fallback,
            ..ScorerConfig::default()
        }
    }

    #[test]
    fn test_simulated_confidence_bounds() {
        let config = SimulationConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let c = simulated_confidence(&config, 1000, 1000, &mut rng);
            assert!((0.699..=0.801).contains(&c), "{c}");
        }
    }

    #[test]
    fn test_simulated_size_difference_penalty() {
        let config = SimulationConfig {
            jitter: 0.0,
            ..SimulationConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let same = simulated_confidence(&config, 500, 500, &mut rng);
        let half = simulated_confidence(&config, 500, 1000, &mut rng);
        assert!((same - 0.75).abs() < 1e-6);
        assert!((half - 0.70).abs() < 1e-6);
    }

    #[test]
    fn test_simulated_empty_inputs() {
        let config = SimulationConfig {
            jitter: 0.0,
            ..SimulationConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert!((simulated_confidence(&config, 0, 0, &mut rng) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_simulated_non_finite_parameters_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(0);
        let infinite = SimulationConfig {
            jitter: f32::INFINITY,
            ..SimulationConfig::default()
        };
        assert!((simulated_confidence(&infinite, 10, 10, &mut rng) - 0.75).abs() < 1e-6);

        let nan_weight = SimulationConfig {
            jitter: 0.0,
            size_difference_weight: f32::NAN,
            ..SimulationConfig::default()
        };
        assert_eq!(simulated_confidence(&nan_weight, 10, 20, &mut rng), 0.0);
    }

    #[tokio::test]
    async fn test_seeded_scores_repeat() {
        let a = image_of_len(900);
        let b = image_of_len(1000);
        let s1 = SimilarityScorer::<Unconfigured>::new(None, ScorerConfig::default()).with_seed(42);
        let s2 = SimilarityScorer::<Unconfigured>::new(None, ScorerConfig::default()).with_seed(42);
        assert_eq!(s1.score(&a, &b).await.unwrap(), s2.score(&a, &b).await.unwrap());
    }

    #[tokio::test]
    async fn test_external_confidence_passed_through() {
        let svc = Fixed(Ok(Comparison {
            confidence: 0.91,
            is_identical: true,
        }));
        let scorer = SimilarityScorer::new(Some(svc), external(true));
        let s = scorer.score(&image_of_len(10), &image_of_len(10)).await.unwrap();
        assert_eq!(
            s,
            Score {
                confidence: 0.91,
                mode: ScoreMode::External
            }
        );
    }

    #[tokio::test]
    async fn test_external_no_face_scores_zero() {
        let svc = Fixed(Err(ComparisonError::NoFaceDetected));
        let scorer = SimilarityScorer::new(Some(svc), external(true));
        let s = scorer.score(&image_of_len(10), &image_of_len(10)).await.unwrap();
        assert_eq!(s.confidence, 0.0);
        assert_eq!(s.mode, ScoreMode::External);
    }

    #[tokio::test]
    async fn test_unsupported_falls_back_when_enabled() {
        let svc = Fixed(Err(ComparisonError::UnsupportedFeature("Verify".into())));
        let scorer = SimilarityScorer::new(Some(svc), external(true)).with_seed(1);
        let s = scorer.score(&image_of_len(10), &image_of_len(10)).await.unwrap();
        assert_eq!(s.mode, ScoreMode::Simulated);
        assert!((0.0..=1.0).contains(&s.confidence));
    }

    #[tokio::test]
    async fn test_unsupported_errors_when_disabled() {
        let svc = Fixed(Err(ComparisonError::UnsupportedFeature("Verify".into())));
        let scorer = SimilarityScorer::new(Some(svc), external(false));
        assert!(matches!(
            scorer.score(&image_of_len(10), &image_of_len(10)).await,
            Err(ScoreError::FallbackDisabled(ComparisonError::UnsupportedFeature(_)))
        ));
    }

    #[tokio::test]
    async fn test_missing_service_respects_policy() {
        let enabled = SimilarityScorer::<Unconfigured>::new(None, external(true));
        assert_eq!(
            enabled.score(&image_of_len(1), &image_of_len(1)).await.unwrap().mode,
            ScoreMode::Simulated
        );

        let disabled = SimilarityScorer::<Unconfigured>::new(None, external(false));
        assert_eq!(
            disabled.score(&image_of_len(1), &image_of_len(1)).await,
            Err(ScoreError::FallbackDisabled(ComparisonError::NotConfigured))
        );
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let svc = Fixed(Err(ComparisonError::Transport("connection reset".into())));
        let scorer = SimilarityScorer::new(Some(svc), external(true));
        assert!(matches!(
            scorer.score(&image_of_len(10), &image_of_len(10)).await,
            Err(ScoreError::Comparison(ComparisonError::Transport(_)))
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_fallback() {
        let svc = Fixed(Err(ComparisonError::Unauthorized("bad key".into())));
        let scorer = SimilarityScorer::new(Some(svc), external(true));
        assert!(matches!(
            scorer.score(&image_of_len(10), &image_of_len(10)).await,
            Err(ScoreError::Comparison(ComparisonError::Unauthorized(_)))
        ));
    }

    #[tokio::test]
    async fn test_simulated_mode_ignores_service() {
        let svc = Fixed(Ok(Comparison {
            confidence: 0.99,
            is_identical: true,
        }));
        let scorer = SimilarityScorer::new(Some(svc), ScorerConfig::default());
        let s = scorer.score(&image_of_len(10), &image_of_len(10)).await.unwrap();
        assert_eq!(s.mode, ScoreMode::Simulated);
    }
}
