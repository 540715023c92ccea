use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stratus::backend::LocalBackend;
use stratus::storage::FsStorage;
use stratus::{Error, PipelineDefinition, PipelineRun, Result, RunParams};

/// Exit code for definition/validation failures, distinct from a run
/// that executed and failed.
const EXIT_INVALID: u8 = 2;
const EXIT_RUN_FAILED: u8 = 1;

/// Stratus - pipeline orchestrator for DAGs of long-running remote jobs
#[derive(Parser, Debug)]
#[command(name = "stratus")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    RUST_LOG        Log filter (default: info)")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Validate a pipeline definition without running it
    Validate {
        /// Path to the pipeline definition (TOML)
        pipeline: PathBuf,
    },

    /// Compile a definition to a portable JSON pipeline artifact
    Compile {
        /// Path to the pipeline definition (TOML)
        pipeline: PathBuf,

        /// Where to write the compiled artifact
        #[arg(long, default_value = "pipeline.json")]
        out: PathBuf,
    },

    /// Execute a pipeline against the local process backend
    Run {
        /// Path to the pipeline definition (TOML)
        pipeline: PathBuf,

        /// Run parameters file (TOML); CLI flags override its values
        #[arg(long)]
        params: Option<PathBuf>,

        /// Project identifier
        #[arg(long)]
        project: Option<String>,

        /// Region identifier
        #[arg(long)]
        region: Option<String>,

        /// Storage root every artifact location derives from
        #[arg(long)]
        storage_root: Option<String>,

        /// Default execution image
        #[arg(long)]
        image: Option<String>,

        /// Maximum concurrently in-flight tasks
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Per-task timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Also write the run report JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Command::Validate { pipeline } => match validate(&pipeline) {
            Ok(()) => {
                info!("pipeline definition is valid");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                ExitCode::from(EXIT_INVALID)
            }
        },
        Command::Compile { pipeline, out } => match compile(&pipeline, &out) {
            Ok(()) => {
                info!(out = %out.display(), "compiled pipeline artifact");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                ExitCode::from(EXIT_INVALID)
            }
        },
        Command::Run {
            pipeline,
            params,
            project,
            region,
            storage_root,
            image,
            max_concurrency,
            timeout_secs,
            report,
        } => {
            let run_params = match load_params(
                params,
                project,
                region,
                storage_root,
                image,
                max_concurrency,
                timeout_secs,
            ) {
                Ok(p) => p,
                Err(e) => {
                    error!("{}", e);
                    return ExitCode::from(EXIT_INVALID);
                }
            };
            match execute(&pipeline, run_params, report).await {
                Ok(true) => ExitCode::SUCCESS,
                Ok(false) => ExitCode::from(EXIT_RUN_FAILED),
                Err(e) => {
                    error!("{}", e);
                    ExitCode::from(exit_code_for(&e))
                }
            }
        }
    }
}

fn validate(pipeline: &PathBuf) -> Result<()> {
    let definition = PipelineDefinition::load(pipeline)?;
    definition.build_dag()?.validate()
}

fn compile(pipeline: &PathBuf, out: &PathBuf) -> Result<()> {
    let definition = PipelineDefinition::load(pipeline)?;
    // A definition that fails validation must not compile either.
    definition.build_dag()?.validate()?;
    std::fs::write(out, definition.compile_json()?)?;
    Ok(())
}

fn load_params(
    file: Option<PathBuf>,
    project: Option<String>,
    region: Option<String>,
    storage_root: Option<String>,
    image: Option<String>,
    max_concurrency: Option<usize>,
    timeout_secs: Option<u64>,
) -> Result<RunParams> {
    let mut params = match file {
        Some(path) => RunParams::load(&path)?,
        None => RunParams::new("", "", "", ""),
    };
    if let Some(project) = project {
        params.project = project;
    }
    if let Some(region) = region {
        params.region = region;
    }
    if let Some(storage_root) = storage_root {
        params.storage_root = storage_root;
    }
    if let Some(image) = image {
        params.image = image;
    }
    if let Some(max_concurrency) = max_concurrency {
        params.max_concurrency = max_concurrency;
    }
    if let Some(timeout_secs) = timeout_secs {
        params.task_timeout_secs = timeout_secs;
    }
    Ok(params)
}

async fn execute(pipeline: &PathBuf, params: RunParams, report_path: Option<PathBuf>) -> Result<bool> {
    let definition = PipelineDefinition::load(pipeline)?;
    let name = definition.pipeline.name.clone();
    let dag = definition.build_dag()?;

    let run = PipelineRun::new(
        name,
        dag,
        params,
        Arc::new(LocalBackend::new()),
        Arc::new(FsStorage::new()),
    )?;

    let cancel = run.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let report = run.execute().await?;
    let json = serde_json::to_string_pretty(&report)?;
    println!("{}", json);
    if let Some(path) = report_path {
        std::fs::write(&path, &json)?;
        info!(path = %path.display(), "report written");
    }
    Ok(report.succeeded())
}

/// Definition and validation problems exit 2; anything that got past
/// validation exits 1.
fn exit_code_for(e: &Error) -> u8 {
    match e {
        Error::DuplicateTaskName(_)
        | Error::UnknownTask(_)
        | Error::CycleDetected { .. }
        | Error::UnresolvedInput { .. }
        | Error::ExternalArtifactMissing { .. }
        | Error::InvalidParameters(_)
        | Error::Definition(_)
        | Error::TomlParse(_) => EXIT_INVALID,
        _ => EXIT_RUN_FAILED,
    }
}
