//! Tunable policy constants for every pipeline stage.
//!
//! All weights, thresholds and calibration constants are empirical. They are
//! grouped here so they can be retuned from a config file without code
//! changes; `Default` reproduces the calibrated values.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decision::Thresholds;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Frame quality scoring weights and calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub face_size_weight: f32,
    pub sharpness_weight: f32,
    pub frontal_weight: f32,
    /// Mean squared Laplacian that maps to a sharpness score of 1.0.
    pub sharpness_normalization: f32,
    /// Frontal score used when the detector returns no landmarks.
    pub neutral_frontal_score: f32,
    /// Eye-line tilt (radians) at which the frontal score reaches 0.
    pub max_tilt_radians: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            face_size_weight: 0.5,
            sharpness_weight: 0.3,
            frontal_weight: 0.2,
            sharpness_normalization: 10_000.0,
            neutral_frontal_score: 0.5,
            max_tilt_radians: std::f32::consts::FRAC_PI_4,
        }
    }
}

/// Crop/align/resize parameters for face normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Padding added on each side of the face box, as a fraction of its size.
    pub padding: f32,
    /// Eye-line tilts at or below this many degrees are left unrotated.
    pub alignment_dead_zone_degrees: f32,
    /// Side length of the square canonical output.
    pub canonical_size: u32,
    pub jpeg_quality: u8,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            padding: 0.20,
            alignment_dead_zone_degrees: 2.0,
            canonical_size: 256,
            jpeg_quality: 90,
        }
    }
}

/// Where similarity scores come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Local placeholder score only. Not a real similarity measure.
    #[default]
    Simulated,
    /// Delegate to the configured face comparison service.
    ExternalService,
}

impl std::str::FromStr for VerificationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" => Ok(Self::Simulated),
            "external_service" | "external" => Ok(Self::ExternalService),
            other => Err(ConfigError::Invalid(format!("unknown verification mode: {other}"))),
        }
    }
}

/// Parameters of the local placeholder similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub base_confidence: f32,
    /// Half-width of the symmetric uniform perturbation.
    pub jitter: f32,
    /// Confidence removed per unit of relative encoded-size difference.
    pub size_difference_weight: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            base_confidence: 0.75,
            jitter: 0.05,
            size_difference_weight: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub mode: VerificationMode,
    /// Drop to the local score when the service reports the comparison as
    /// unsupported for our credentials. When false that case is a hard error.
    pub fallback_on_unsupported: bool,
    pub simulation: SimulationConfig,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            mode: VerificationMode::default(),
            fallback_on_unsupported: true,
            simulation: SimulationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub quality: QualityConfig,
    pub normalizer: NormalizerConfig,
    pub thresholds: Thresholds,
    pub scorer: ScorerConfig,
}

impl PipelineConfig {
    /// Reject values that would make a stage meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let q = &self.quality;
        if [q.face_size_weight, q.sharpness_weight, q.frontal_weight]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(ConfigError::Invalid("quality weights must be non-negative".into()));
        }
        if !(q.sharpness_normalization > 0.0) {
            return Err(ConfigError::Invalid("sharpness_normalization must be positive".into()));
        }
        if !(q.max_tilt_radians > 0.0) {
            return Err(ConfigError::Invalid("max_tilt_radians must be positive".into()));
        }

        let n = &self.normalizer;
        if n.canonical_size == 0 {
            return Err(ConfigError::Invalid("canonical_size must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&n.padding) {
            return Err(ConfigError::Invalid(format!(
                "padding must be within [0, 1], got {}",
                n.padding
            )));
        }
        if !(n.alignment_dead_zone_degrees.is_finite() && n.alignment_dead_zone_degrees >= 0.0) {
            return Err(ConfigError::Invalid(
                "alignment_dead_zone_degrees must be finite and non-negative".into(),
            ));
        }

        let t = &self.thresholds;
        if !(0.0 <= t.retry
            && t.retry <= t.accept
            && t.accept <= t.auto_accept
            && t.auto_accept <= 1.0)
        {
            return Err(ConfigError::Invalid(format!(
                "thresholds must satisfy 0 <= retry <= accept <= auto_accept <= 1, got {}/{}/{}",
                t.retry, t.accept, t.auto_accept
            )));
        }

        let s = &self.scorer.simulation;
        if !(0.0..=1.0).contains(&s.base_confidence) {
            return Err(ConfigError::Invalid("base_confidence must be within [0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&s.jitter) {
            return Err(ConfigError::Invalid(format!(
                "jitter must be within [0, 1], got {}",
                s.jitter
            )));
        }
        if !(s.size_difference_weight.is_finite() && s.size_difference_weight >= 0.0) {
            return Err(ConfigError::Invalid(
                "size_difference_weight must be finite and non-negative".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(PipelineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_default_constants() {
        let c = PipelineConfig::default();
        assert_eq!(c.quality.face_size_weight, 0.5);
        assert_eq!(c.quality.sharpness_weight, 0.3);
        assert_eq!(c.quality.frontal_weight, 0.2);
        assert_eq!(c.quality.sharpness_normalization, 10_000.0);
        assert_eq!(c.normalizer.canonical_size, 256);
        assert_eq!(c.normalizer.alignment_dead_zone_degrees, 2.0);
        assert!(c.scorer.fallback_on_unsupported);
        assert_eq!(c.scorer.mode, VerificationMode::Simulated);
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let mut c = PipelineConfig::default();
        c.thresholds.accept = 0.9;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_zero_canonical_size_rejected() {
        let mut c = PipelineConfig::default();
        c.normalizer.canonical_size = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_non_finite_simulation_rejected() {
        let mut config = PipelineConfig::default();
        config.scorer.simulation.jitter = f32::INFINITY;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.scorer.simulation.jitter = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.scorer.simulation.size_difference_weight = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_dead_zone_rejected() {
        let mut config = PipelineConfig::default();
        config.normalizer.alignment_dead_zone_degrees = f32::NAN;
        assert!(config.validate().is_err());

        config.normalizer.alignment_dead_zone_degrees = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("simulated".parse::<VerificationMode>(), Ok(VerificationMode::Simulated));
        assert_eq!(
            "External_Service".parse::<VerificationMode>(),
            Ok(VerificationMode::ExternalService)
        );
        assert!("magic".parse::<VerificationMode>().is_err());
    }
}
