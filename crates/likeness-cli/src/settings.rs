use std::path::{Path, PathBuf};
use std::str::FromStr;

use likeness_core::config::{ConfigError, PipelineConfig, VerificationMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    #[default]
    Heuristic,
    Scrfd,
}

/// Service settings: an optional TOML file overridden by `LIKENESS_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub verification_mode: VerificationMode,
    /// Base URL of the face comparison service.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub fallback_on_unsupported: bool,
    /// Most live frames used from one burst.
    pub burst_frames: usize,
    /// Pause between captures; read by capture clients, not by the pipeline.
    pub frame_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// SQLite database holding the audit trail of verification outcomes.
    pub audit_db: PathBuf,
    pub detector: DetectorKind,
    pub scrfd_model: Option<PathBuf>,
    pub pipeline: PipelineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            verification_mode: VerificationMode::default(),
            endpoint: None,
            api_key: None,
            fallback_on_unsupported: true,
            burst_frames: 10,
            frame_delay_ms: 100,
            request_timeout_secs: 10,
            audit_db: default_data_dir().join("audit.db"),
            detector: DetectorKind::default(),
            scrfd_model: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Settings {
    /// Load `path` (if given), apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings.pipeline_config()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `LIKENESS_*` variables resolved by `lookup`.
    /// Unparsable values are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(mode) = env_parsed(&lookup, "LIKENESS_MODE") {
            self.verification_mode = mode;
        }
        if let Some(endpoint) = lookup("LIKENESS_COMPARE_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Some(key) = lookup("LIKENESS_COMPARE_KEY") {
            self.api_key = Some(key);
        }
        if let Some(v) = lookup("LIKENESS_FALLBACK_ON_UNSUPPORTED") {
            self.fallback_on_unsupported = !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }
        if let Some(n) = env_parsed(&lookup, "LIKENESS_BURST_FRAMES") {
            self.burst_frames = n;
        }
        if let Some(ms) = env_parsed(&lookup, "LIKENESS_FRAME_DELAY_MS") {
            self.frame_delay_ms = ms;
        }
        if let Some(path) = lookup("LIKENESS_AUDIT_DB") {
            self.audit_db = PathBuf::from(path);
        }
        if let Some(path) = lookup("LIKENESS_SCRFD_MODEL") {
            self.scrfd_model = Some(PathBuf::from(path));
            self.detector = DetectorKind::Scrfd;
        }
    }

    /// The pipeline configuration with the service-level mode and fallback
    /// policy applied.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let mut config = self.pipeline.clone();
        config.scorer.mode = self.verification_mode;
        config.scorer.fallback_on_unsupported = self.fallback_on_unsupported;
        config.validate()?;

        if self.burst_frames == 0 {
            return Err(ConfigError::Invalid("burst_frames must be > 0".into()));
        }
        if self.verification_mode == VerificationMode::ExternalService
            && !self.fallback_on_unsupported
            && !self.has_service()
        {
            return Err(ConfigError::Invalid(
                "external_service mode needs endpoint and api_key when fallback is disabled".into(),
            ));
        }
        Ok(config)
    }

    pub fn has_service(&self) -> bool {
        matches!(
            (&self.endpoint, &self.api_key),
            (Some(e), Some(k)) if !e.is_empty() && !k.is_empty()
        )
    }

    /// Copy safe to print: the API key is masked.
    pub fn redacted(&self) -> Self {
        Self {
            api_key: self.api_key.as_ref().map(|_| "********".to_string()),
            ..self.clone()
        }
    }
}

fn env_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = lookup(key)?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "ignoring unparsable environment override");
            None
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("likeness")
}
