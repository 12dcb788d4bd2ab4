use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;

use proctor_core::detection::domain::perception::NoLandmarkService;
use proctor_core::detection::infrastructure::recorded_services::{
    RecordedServices, RecordedSession,
};
use proctor_core::identity::domain::embedding::EmbeddingService;
use proctor_core::identity::domain::identity_matcher::IdentityMatcher;
use proctor_core::identity::domain::identity_verifier::{
    EmbeddedReferenceSource, IdentityVerifier, ReferenceCache, ReferenceSource,
};
use proctor_core::identity::infrastructure::file_reference_store::FileReferenceStore;
use proctor_core::identity::infrastructure::json_reference_file::JsonReferenceFile;
use proctor_core::identity::infrastructure::onnx_embedding_service::OnnxEmbeddingService;
use proctor_core::pipeline::frame_logger::StdoutFrameLogger;
use proctor_core::pipeline::infrastructure::parallel_replay_executor::ParallelReplayExecutor;
use proctor_core::pipeline::replay_executor::ReplayJob;
use proctor_core::pipeline::replay_use_case::ReplayUseCase;
use proctor_core::pipeline::session_registry::SessionRegistry;
use proctor_core::pipeline::violation_orchestrator::{OrchestratorPorts, ViolationOrchestrator};
use proctor_core::shared::config::ProctorConfig;
use proctor_core::violations::domain::violation_recorder::ViolationRecorder;
use proctor_core::violations::domain::violation_store::ViolationStore;
use proctor_core::violations::infrastructure::in_memory_store::InMemoryViolationStore;
use proctor_core::violations::infrastructure::jsonl_store::JsonlViolationStore;

/// Replays recorded proctoring sessions through the violation engine and
/// prints one JSON report per frame.
#[derive(Parser)]
#[command(name = "proctor")]
struct Cli {
    /// Session to replay as STUDENT_ID=RECORDING.jsonl (repeatable).
    #[arg(long = "session", required = true, value_parser = parse_session)]
    sessions: Vec<(String, PathBuf)>,

    /// Exam the sessions belong to.
    #[arg(long, default_value = "exam")]
    exam_id: String,

    /// JSON file of precomputed reference embeddings per student.
    #[arg(long, conflicts_with = "reference_dir")]
    references: Option<PathBuf>,

    /// Directory of <student>_<view>_<timestamp>.png reference images.
    #[arg(long, requires = "embedding_model")]
    reference_dir: Option<PathBuf>,

    /// ONNX face embedding model, used for reference and live images.
    #[arg(long)]
    embedding_model: Option<PathBuf>,

    /// Engine configuration (JSON). Defaults to the user config if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Append violations to this JSON-lines file.
    #[arg(long)]
    violations_out: Option<PathBuf>,

    /// Pretty-print each report.
    #[arg(long)]
    pretty: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let config = load_config(cli.config.as_deref())?;
    let store = build_store(cli.violations_out.as_deref())?;
    let recorder = Arc::new(ViolationRecorder::new(
        store,
        config.session.duplicate_window(),
        config.session.recorded_confidence,
    ));
    let live_model = match &cli.embedding_model {
        Some(path) => {
            log::info!("Loading embedding model: {}", path.display());
            Some(Arc::new(OnnxEmbeddingService::new(path)?) as Arc<dyn EmbeddingService>)
        }
        None => None,
    };
    let references = Arc::new(ReferenceCache::new(build_reference_source(
        &cli,
        live_model.clone(),
    )?));
    let registry = SessionRegistry::new(config.clone());

    let mut jobs = Vec::with_capacity(cli.sessions.len());
    for (student_id, path) in &cli.sessions {
        let recording = Arc::new(RecordedSession::open(path)?);
        log::info!(
            "Session {student_id}: {} frames from {}",
            recording.len(),
            path.display()
        );
        let recorded = Arc::new(RecordedServices::new(recording.clone()));
        let embedder: Arc<dyn EmbeddingService> = match &live_model {
            Some(model) => model.clone(),
            None => recorded.clone(),
        };
        let verifier = IdentityVerifier::new(
            IdentityMatcher::new(config.identity.clone()),
            references.clone(),
            embedder,
        );
        let ports = OrchestratorPorts {
            perception: recorded,
            landmarks: Arc::new(NoLandmarkService),
            verifier: Arc::new(verifier),
        };
        jobs.push(ReplayJob {
            session: registry.session(student_id, &cli.exam_id),
            orchestrator: Arc::new(ViolationOrchestrator::new(
                config.clone(),
                ports,
                recorder.clone(),
            )),
            recording,
        });
    }

    let mut use_case = ReplayUseCase::new(
        jobs,
        Box::new(ParallelReplayExecutor::new()),
        Box::new(StdoutFrameLogger::default()),
        None,
    );
    let pretty = cli.pretty;
    let mut print_error = None;
    let stats = use_case.execute(&mut |event| {
        let line = if pretty {
            serde_json::to_string_pretty(event)
        } else {
            serde_json::to_string(event)
        };
        match line {
            Ok(line) => println!("{line}"),
            Err(e) => {
                print_error.get_or_insert(e);
            }
        }
    })?;
    if let Some(e) = print_error {
        return Err(e.into());
    }

    log::info!(
        "Replayed {} frames across {} session(s); {} skipped",
        stats.frames,
        stats.sessions,
        stats.skipped_frames
    );
    if stats.store_failures > 0 {
        return Err(format!(
            "{} frame(s) could not be written to the violation store",
            stats.store_failures
        )
        .into());
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ProctorConfig, Box<dyn std::error::Error>> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => ProctorConfig::default_path().filter(|p| p.exists()),
    };
    let config = match path {
        Some(path) => {
            log::info!("Using config {}", path.display());
            ProctorConfig::from_file(&path)?
        }
        None => ProctorConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn build_store(path: Option<&Path>) -> Result<Arc<dyn ViolationStore>, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => Arc::new(JsonlViolationStore::new(path)?),
        None => Arc::new(InMemoryViolationStore::new()),
    })
}

fn build_reference_source(
    cli: &Cli,
    model: Option<Arc<dyn EmbeddingService>>,
) -> Result<Arc<dyn ReferenceSource>, Box<dyn std::error::Error>> {
    if let Some(path) = &cli.references {
        return Ok(Arc::new(JsonReferenceFile::open(path)?));
    }
    match (&cli.reference_dir, model) {
        (Some(dir), Some(model)) => Ok(Arc::new(EmbeddedReferenceSource::new(
            Arc::new(FileReferenceStore::new(dir)),
            model,
        ))),
        _ => Err("Either --references or --reference-dir with --embedding-model is required".into()),
    }
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    for (student_id, path) in &cli.sessions {
        if !path.exists() {
            return Err(format!(
                "Recording for {student_id} not found: {}",
                path.display()
            )
            .into());
        }
    }
    if let Some(path) = &cli.references {
        if !path.exists() {
            return Err(format!("Reference file not found: {}", path.display()).into());
        }
    }
    if let Some(dir) = &cli.reference_dir {
        if !dir.is_dir() {
            return Err(format!("Reference directory not found: {}", dir.display()).into());
        }
    }
    if let Some(model) = &cli.embedding_model {
        if !model.exists() {
            return Err(format!("Embedding model not found: {}", model.display()).into());
        }
    }
    if cli.exam_id.trim().is_empty() {
        return Err("Exam id must not be empty".into());
    }
    Ok(())
}

fn parse_session(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((student, path)) if !student.trim().is_empty() && !path.is_empty() => {
            Ok((student.trim().to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected STUDENT_ID=RECORDING, got '{value}'")),
    }
}
