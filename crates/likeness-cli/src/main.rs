use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use likeness_core::config::VerificationMode;
use likeness_core::detector::{FaceDetector, HeuristicDetector};
use likeness_core::validation::{self, human_size, ValidationError};
use likeness_core::{Decision, DecisionEngine, Image, Pipeline};
use likeness_remote::HttpFaceComparison;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod audit;
mod settings;

use audit::{MemoryStore, SqliteStore, VerificationRecord, VerificationStore};
use settings::{DetectorKind, Settings};

#[derive(Parser)]
#[command(
    name = "likeness",
    version,
    about = "Match a live capture burst against an ID document photo"
)]
struct Cli {
    /// TOML settings file; LIKENESS_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify live frames against a document photo
    Verify {
        /// Document (ID card) photo
        #[arg(short, long)]
        document: PathBuf,
        /// Live frames, in capture order
        #[arg(required = true)]
        frames: Vec<PathBuf>,
        /// Audit key for the document; defaults to its SHA-256
        #[arg(long)]
        document_id: Option<String>,
        /// Seed for the simulated score
        #[arg(long)]
        seed: Option<u64>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
        /// Do not write the audit record to the database
        #[arg(long)]
        no_audit: bool,
    },
    /// Map a confidence onto a decision band
    Decide {
        confidence: f32,
    },
    /// Show the decision thresholds
    Thresholds,
    /// Check whether a file is an acceptable upload
    Check {
        path: PathBuf,
    },
    /// Show audited verifications of a document, or one record by id
    History {
        #[arg(long, required_unless_present = "id")]
        document_id: Option<String>,
        #[arg(long, conflicts_with = "document_id")]
        id: Option<Uuid>,
        #[arg(long)]
        json: bool,
    },
    /// Print the effective settings
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    match cli.command {
        Commands::Verify {
            document,
            frames,
            document_id,
            seed,
            json,
            no_audit,
        } => verify(&settings, &document, &frames, document_id, seed, json, no_audit).await,
        Commands::Decide { confidence } => {
            let result = DecisionEngine::new(settings.pipeline.thresholds).decide(confidence);
            println!("{} ({:.3}): {}", result.decision, result.confidence, result.message);
            Ok(exit_code(result.decision))
        }
        Commands::Thresholds => {
            let (auto_accept, accept, retry) = settings.pipeline.thresholds.as_tuple();
            println!("auto_accept  >= {auto_accept:.2}");
            println!("accept       >= {accept:.2}");
            println!("retry        >= {retry:.2}");
            println!("reject        < {retry:.2}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { path } => check(&path),
        Commands::History { document_id, id, json } => {
            let store = SqliteStore::open(&settings.audit_db)
                .with_context(|| format!("opening {}", settings.audit_db.display()))?;
            let records = match (id, document_id) {
                (Some(id), _) => store.find_by_id(id).map(|r| r.into_iter().collect::<Vec<_>>()),
                (None, Some(document_id)) => store.find_by_document(&document_id),
                (None, None) => Ok(Vec::new()),
            }
            .with_context(|| format!("reading {}", store.path().display()))?;
            print_history(&records, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&settings.redacted())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn verify(
    settings: &Settings,
    document: &Path,
    frames: &[PathBuf],
    document_id: Option<String>,
    seed: Option<u64>,
    json: bool,
    no_audit: bool,
) -> Result<ExitCode> {
    let document_bytes =
        std::fs::read(document).with_context(|| format!("reading {}", document.display()))?;

    if frames.len() > settings.burst_frames {
        tracing::warn!(given = frames.len(), used = settings.burst_frames, "burst truncated");
    }
    let frame_bytes = frames
        .iter()
        .take(settings.burst_frames)
        .map(|path| std::fs::read(path).with_context(|| format!("reading {}", path.display())))
        .collect::<Result<Vec<_>>>()?;

    let config = settings.pipeline_config()?;
    let pipeline = Pipeline::new(config, build_detector(settings)?, build_comparison(settings)?);
    let pipeline = match seed {
        Some(seed) => pipeline.with_seed(seed),
        None => pipeline,
    };

    let verification = pipeline.verify_encoded(&frame_bytes, &document_bytes).await?;

    let record = VerificationRecord::new(
        document_id.unwrap_or_else(|| audit::document_fingerprint(&document_bytes)),
        frame_bytes.len(),
        verification.frame_index,
        verification.score_mode,
        verification.result.clone(),
    );
    let store: Box<dyn VerificationStore> = if no_audit {
        Box::new(MemoryStore::new())
    } else {
        let store = SqliteStore::open(&settings.audit_db)
            .with_context(|| format!("opening {}", settings.audit_db.display()))?;
        Box::new(store)
    };
    store
        .save(&record)
        .with_context(|| format!("writing audit record to {}", settings.audit_db.display()))?;

    let result = &verification.result;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("decision:   {}", result.decision);
        println!("identical:  {}", result.is_identical);
        println!("confidence: {:.3}", result.confidence);
        if let Some(mode) = verification.score_mode {
            println!("score mode: {mode}");
        }
        if let Some(index) = verification.frame_index {
            println!("frame:      {} ({})", index, frames[index].display());
        }
        println!("message:    {}", result.message);
        println!("record:     {}", record.id);
    }

    Ok(exit_code(result.decision))
}

fn build_detector(settings: &Settings) -> Result<Box<dyn FaceDetector>> {
    match settings.detector {
        DetectorKind::Heuristic => Ok(Box::new(HeuristicDetector::new())),
        DetectorKind::Scrfd => scrfd_detector(settings),
    }
}

#[cfg(feature = "scrfd")]
fn scrfd_detector(settings: &Settings) -> Result<Box<dyn FaceDetector>> {
    let path = settings
        .scrfd_model
        .as_deref()
        .context("detector = \"scrfd\" requires scrfd_model")?;
    let detector = likeness_core::scrfd::ScrfdDetector::load(path)
        .with_context(|| format!("loading SCRFD model {}", path.display()))?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "scrfd"))]
fn scrfd_detector(_settings: &Settings) -> Result<Box<dyn FaceDetector>> {
    anyhow::bail!("this build has no SCRFD support; rebuild with --features scrfd")
}

fn build_comparison(settings: &Settings) -> Result<Option<HttpFaceComparison>> {
    if settings.verification_mode != VerificationMode::ExternalService {
        return Ok(None);
    }
    let (Some(endpoint), Some(api_key)) = (&settings.endpoint, &settings.api_key) else {
        tracing::warn!("external_service mode without endpoint or api_key");
        return Ok(None);
    };
    let timeout = Duration::from_secs(settings.request_timeout_secs);
    let comparison = HttpFaceComparison::new(endpoint, api_key, timeout)
        .context("creating comparison client")?;
    tracing::info!(url = comparison.url(), "using face comparison service");
    Ok(Some(comparison))
}

fn check(path: &Path) -> Result<ExitCode> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let size = human_size(bytes.len() as u64);

    let outcome = UploadCheck::inspect(bytes);
    match &outcome {
        UploadCheck::Ok {
            format,
            width,
            height,
        } => println!("{}: ok, {format} {width}x{height} ({size})", path.display()),
        UploadCheck::Warning(reason) => println!("{}: warning ({size}): {reason}", path.display()),
        UploadCheck::Rejected(reason) => {
            println!("{}: rejected ({size}): {reason}", path.display())
        }
    }
    Ok(ExitCode::from(outcome.exit_status()))
}

/// Verdict of `check` on one upload.
#[derive(Debug, Clone, PartialEq)]
enum UploadCheck {
    Ok {
        format: String,
        width: u32,
        height: u32,
    },
    /// Not a format the pipeline decodes; the upload itself is well formed.
    Warning(String),
    Rejected(String),
}

impl UploadCheck {
    fn inspect(bytes: Vec<u8>) -> Self {
        let format = match validation::validate_upload(&bytes) {
            Ok(format) => format,
            Err(e @ (ValidationError::UnsupportedFormat(_) | ValidationError::UnknownFormat)) => {
                return Self::Warning(format!("{e}; the file type may not be fully supported"));
            }
            Err(e) => return Self::Rejected(e.to_string()),
        };
        match Image::decode(bytes) {
            Ok(image) => Self::Ok {
                format: format!("{format:?}"),
                width: image.width(),
                height: image.height(),
            },
            Err(e) => Self::Rejected(e.to_string()),
        }
    }

    /// Same convention as `verify`: 0 ok, 2 warning, 1 rejected.
    fn exit_status(&self) -> u8 {
        match self {
            Self::Ok { .. } => 0,
            Self::Warning(_) => 2,
            Self::Rejected(_) => 1,
        }
    }
}

fn print_history(records: &[VerificationRecord], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
    } else if records.is_empty() {
        println!("no matching verifications");
    } else {
        for r in records {
            let mode = r.score_mode.map(|m| m.to_string()).unwrap_or_else(|| "-".into());
            println!(
                "{}  {}  {:<11} {:.3}  {mode:<9} {}",
                r.created_at.format("%Y-%m-%d %H:%M:%S"),
                r.id,
                r.result.decision.to_string(),
                r.result.confidence,
                r.result.message
            );
        }
    }
    Ok(())
}

fn exit_code(decision: Decision) -> ExitCode {
    match decision {
        Decision::Accept | Decision::AutoAccept => ExitCode::SUCCESS,
        Decision::Retry => ExitCode::from(2),
        Decision::Reject => ExitCode::from(1),
    }
}
