//! End-to-end verification: select → normalize ×2 → score → decide.
//!
//! Recoverable capture problems (no usable frame, failed normalization) become
//! a Retry result. Comparison transport/auth failures and panics in the image
//! stages become a Reject with a "technical error" message. Only configuration
//! errors are returned as `Err`.
//!
//! Detection, selection and normalization run on tokio's blocking pool, so the
//! async entry points need a tokio runtime.

use std::sync::Arc;

use thiserror::Error;

use crate::comparison::{FaceComparison, Unconfigured};
use crate::config::PipelineConfig;
use crate::decision::DecisionEngine;
use crate::detector::{FaceDetector, HeuristicDetector};
use crate::normalizer::FaceNormalizer;
use crate::photo::Image;
use crate::scorer::{ScoreError, ScoreMode, SimilarityScorer};
use crate::selector::FrameSelector;
use crate::types::VerificationResult;

const MESSAGE_NO_USABLE_FRAME: &str = "no usable live frame";
const MESSAGE_NORMALIZATION_FAILED: &str = "face could not be normalized";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// A verification result plus how it was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub result: VerificationResult,
    /// Burst index of the live frame that was compared, if one was selected.
    pub frame_index: Option<usize>,
    /// Origin of the similarity score, if scoring ran.
    pub score_mode: Option<ScoreMode>,
}

impl Verification {
    fn early(result: VerificationResult, frame_index: Option<usize>) -> Self {
        Self {
            result,
            frame_index,
            score_mode: None,
        }
    }
}

/// Stateless verification pipeline; safe to share across concurrent requests.
pub struct Pipeline<D, C> {
    detector: Arc<D>,
    scorer: SimilarityScorer<C>,
    engine: DecisionEngine,
    config: Arc<PipelineConfig>,
}

/// Outcome of the image stages, computed off the async executor.
enum Prepared {
    NoUsableFrame,
    NotNormalized { frame_index: usize },
    Ready {
        frame_index: usize,
        live: Image,
        reference: Image,
    },
}

impl Pipeline<HeuristicDetector, Unconfigured> {
    /// Heuristic detection and simulated scoring; needs no model or service.
    pub fn simulated(config: PipelineConfig) -> Self {
        Self::new(config, HeuristicDetector::new(), None)
    }
}

impl<D: FaceDetector + 'static, C: FaceComparison> Pipeline<D, C> {
    pub fn new(config: PipelineConfig, detector: D, comparison: Option<C>) -> Self {
        Self {
            detector: Arc::new(detector),
            scorer: SimilarityScorer::new(comparison, config.scorer.clone()),
            engine: DecisionEngine::new(config.thresholds),
            config: Arc::new(config),
        }
    }

    /// Seed the local fallback score.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            scorer: self.scorer.with_seed(seed),
            ..self
        }
    }

    pub fn decision_engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// Verify a burst of live frames against a document photo.
    pub async fn verify_identity(
        &self,
        frames: &[Image],
        document: &Image,
    ) -> Result<VerificationResult, PipelineError> {
        self.verify_detailed(frames, document).await.map(|v| v.result)
    }

    /// Verify a single live frame against a document photo.
    pub async fn verify_single(
        &self,
        frame: &Image,
        document: &Image,
    ) -> Result<VerificationResult, PipelineError> {
        self.verify_identity(std::slice::from_ref(frame), document).await
    }

    /// Verify raw uploads. Frames that fail validation or decoding are
    /// skipped; an unreadable document photo is a technical error. The
    /// reported frame index refers to the position in `frames`.
    pub async fn verify_encoded(
        &self,
        frames: &[Vec<u8>],
        document: &[u8],
    ) -> Result<Verification, PipelineError> {
        let (indices, decoded): (Vec<usize>, Vec<Image>) = frames
            .iter()
            .enumerate()
            .filter_map(|(index, bytes)| match Image::from_upload(bytes.clone()) {
                Ok(image) => Some((index, image)),
                Err(e) => {
                    tracing::warn!(
                        stage = "decode",
                        frame = index,
                        error = %e,
                        "unreadable live frame; skipping"
                    );
                    None
                }
            })
            .unzip();

        let document = match Image::from_upload(document.to_vec()) {
            Ok(image) => image,
            Err(e) => {
                tracing::error!(stage = "decode", error = %e, "unreadable document photo");
                return Ok(Verification::early(VerificationResult::technical_error(), None));
            }
        };

        let mut verification = self.verify_detailed(&decoded, &document).await?;
        verification.frame_index = verification.frame_index.and_then(|i| indices.get(i).copied());
        Ok(verification)
    }

    /// Run every stage and report which frame and score mode were used.
    pub async fn verify_detailed(
        &self,
        frames: &[Image],
        document: &Image,
    ) -> Result<Verification, PipelineError> {
        tracing::info!(
            frames = frames.len(),
            detector = self.detector.name(),
            mode = ?self.scorer.mode(),
            "verification started"
        );

        let detector = Arc::clone(&self.detector);
        let config = Arc::clone(&self.config);
        let frames = frames.to_vec();
        let document = document.clone();
        let prepared = tokio::task::spawn_blocking(move || {
            prepare(&*detector, &config, &frames, &document)
        })
        .await;

        let (frame_index, live, reference) = match prepared {
            Ok(Prepared::Ready {
                frame_index,
                live,
                reference,
            }) => (Some(frame_index), live, reference),
            Ok(Prepared::NoUsableFrame) => {
                let result = VerificationResult::retry(MESSAGE_NO_USABLE_FRAME);
                return Ok(Verification::early(result, None));
            }
            Ok(Prepared::NotNormalized { frame_index }) => {
                let result = VerificationResult::retry(MESSAGE_NORMALIZATION_FAILED);
                return Ok(Verification::early(result, Some(frame_index)));
            }
            Err(e) => {
                tracing::error!(
                    stage = "prepare",
                    panicked = e.is_panic(),
                    error = %e,
                    "verification aborted"
                );
                return Ok(Verification::early(VerificationResult::technical_error(), None));
            }
        };

        let score = match self.scorer.score(&live, &reference).await {
            Ok(score) => score,
            Err(ScoreError::FallbackDisabled(e)) => {
                return Err(PipelineError::Configuration(e.to_string()));
            }
            Err(e @ ScoreError::Comparison(_)) => {
                tracing::error!(stage = "score", error = %e, "verification aborted");
                let result = VerificationResult::technical_error();
                return Ok(Verification::early(result, frame_index));
            }
        };

        let result = self.engine.decide(score.confidence);
        tracing::info!(
            stage = "decide",
            decision = %result.decision,
            confidence = result.confidence,
            mode = %score.mode,
            "verification finished"
        );

        Ok(Verification {
            result,
            frame_index,
            score_mode: Some(score.mode),
        })
    }
}

/// Select the best live frame and normalize it and the document photo.
fn prepare<D: FaceDetector + ?Sized>(
    detector: &D,
    config: &PipelineConfig,
    frames: &[Image],
    document: &Image,
) -> Prepared {
    let selector = FrameSelector::new(detector, &config.quality);
    let Some(best) = selector.select_best(frames) else {
        tracing::info!(stage = "select", "no usable live frame");
        return Prepared::NoUsableFrame;
    };
    let frame_index = best.frame_index;

    let normalizer = FaceNormalizer::new(detector, &config.normalizer);
    let Some(live) = normalizer.normalize(best.image) else {
        tracing::info!(stage = "normalize", side = "live", "normalization failed");
        return Prepared::NotNormalized { frame_index };
    };
    let Some(reference) = normalizer.normalize(document) else {
        tracing::info!(stage = "normalize", side = "document", "normalization failed");
        return Prepared::NotNormalized { frame_index };
    };

    Prepared::Ready {
        frame_index,
        live,
        reference,
    }
}
