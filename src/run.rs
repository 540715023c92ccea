//! Pipeline run lifecycle.
//!
//! A `PipelineRun` binds a validated DAG to concrete parameters and a
//! backend, drives the orchestrator to completion, and returns a report
//! with each task's terminal state and produced artifact locations —
//! enough for a caller to see exactly where the trained model and its
//! companions ended up.

use crate::backend::JobBackend;
use crate::config::RunParams;
use crate::core::artifact::{ArtifactResolver, ArtifactStatus};
use crate::core::dag::PipelineDag;
use crate::core::task::{InputSource, TaskName, TaskRunState};
use crate::definition::substitute;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::orchestration::{Orchestrator, RootCause, RunEvent};
use crate::storage::ObjectStorage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Unique identifier for a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new unique run identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aggregate status of a pipeline run.
///
/// Succeeded iff every task run succeeded; never partially ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task succeeded.
    Succeeded,
    /// At least one task failed or the run was cancelled.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A produced artifact location in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLocation {
    /// Output slot name.
    pub output: String,
    /// Concrete storage URI.
    pub uri: String,
}

/// Per-task entry in the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    /// Terminal state of the task run.
    pub state: TaskRunState,
    /// Locations of artifacts this task actually produced.
    pub outputs: Vec<OutputLocation>,
}

/// Structured summary returned by `PipelineRun::execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// This run's identifier.
    pub run_id: RunId,
    /// Pipeline name from the definition.
    pub pipeline: String,
    /// Aggregate status.
    pub status: RunStatus,
    /// The single root-cause failure, absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<RootCause>,
    /// Per-task terminal states and artifact locations.
    pub tasks: BTreeMap<TaskName, TaskReport>,
}

impl RunReport {
    /// Check if the run succeeded.
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// One parameterized, end-to-end execution of a DAG.
pub struct PipelineRun {
    id: RunId,
    pipeline: String,
    dag: Arc<PipelineDag>,
    params: RunParams,
    backend: Arc<dyn JobBackend>,
    storage: Arc<dyn ObjectStorage>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PipelineRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRun")
            .field("id", &self.id)
            .field("pipeline", &self.pipeline)
            .field("dag", &self.dag)
            .field("params", &self.params)
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl PipelineRun {
    /// Bind a DAG to run parameters.
    ///
    /// Fails fast, before any side effect: `InvalidParameters` on absent
    /// required parameters, then DAG validation (`CycleDetected`,
    /// `UnresolvedInput`), then a dry substitution pass so malformed
    /// templates never reach a backend.
    pub fn new(
        pipeline: impl Into<String>,
        dag: PipelineDag,
        params: RunParams,
        backend: Arc<dyn JobBackend>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Result<Self> {
        params.validate()?;
        dag.validate()?;
        let vars = params.template_vars();
        for spec in dag.specs() {
            substitute(&spec.exec.image, &vars)?;
            for part in &spec.exec.command {
                substitute(part, &vars)?;
            }
            for arg in &spec.exec.args {
                substitute(arg, &vars)?;
            }
        }
        Ok(Self {
            id: RunId::new(),
            pipeline: pipeline.into(),
            dag: Arc::new(dag),
            params,
            backend,
            storage,
            cancel: CancellationToken::new(),
        })
    }

    /// This run's identifier.
    pub fn id(&self) -> RunId {
        self.id
    }

    /// Token that cancels the run when triggered; clone it before
    /// calling `execute`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the run to completion and return the structured summary.
    ///
    /// External artifacts are existence-checked first: a missing one is
    /// fatal before any submission happens.
    pub async fn execute(self) -> Result<RunReport> {
        info!(run = %self.id.short(), pipeline = %self.pipeline, "starting run");
        self.check_external_artifacts().await?;

        let resolver = Arc::new(RwLock::new(ArtifactResolver::for_dag(
            self.params.storage_root.as_str(),
            &self.dag,
        )));
        let executor = Arc::new(Executor::new(
            Arc::clone(&self.backend),
            self.params.retry_policy(),
            self.params.poll_interval(),
            self.params.task_timeout(),
        ));

        let (event_tx, event_rx) = mpsc::channel(self.dag.task_count().max(1) * 8);
        let logger = tokio::spawn(log_events(event_rx));

        let orchestrator = Orchestrator::new(
            Arc::clone(&self.dag),
            Arc::clone(&resolver),
            Arc::clone(&self.storage),
            executor,
            self.params.template_vars(),
            self.params.max_concurrency,
            self.cancel.clone(),
            event_tx,
        );
        let outcome = orchestrator.run().await;
        let _ = logger.await;

        let status = if outcome.root_cause.is_none() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };

        let resolver = resolver.read().await;
        let tasks: BTreeMap<TaskName, TaskReport> = outcome
            .runs
            .into_iter()
            .map(|(name, run)| {
                let outputs = resolver
                    .output_locations(&name)
                    .into_iter()
                    .filter(|(output, _)| {
                        resolver.status(&name, output) == Some(ArtifactStatus::Produced)
                    })
                    .map(|(output, uri)| OutputLocation { output, uri })
                    .collect();
                (
                    name,
                    TaskReport {
                        state: run.state,
                        outputs,
                    },
                )
            })
            .collect();

        info!(run = %self.id.short(), %status, "run finished");
        Ok(RunReport {
            run_id: self.id,
            pipeline: self.pipeline,
            status,
            root_cause: outcome.root_cause,
            tasks,
        })
    }

    /// Verify every externally-supplied artifact exists before anything
    /// is submitted.
    async fn check_external_artifacts(&self) -> Result<()> {
        for spec in self.dag.specs() {
            for binding in &spec.inputs {
                if let InputSource::External { uri } = &binding.source {
                    if !self.storage.exists(uri).await? {
                        return Err(Error::ExternalArtifactMissing { uri: uri.clone() });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Drain orchestrator events into structured logs.
async fn log_events(mut events: mpsc::Receiver<RunEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::TaskSubmitted { task } => info!(%task, "submitted"),
            RunEvent::TaskRunning { task } => info!(%task, "running"),
            RunEvent::TaskSucceeded { task } => info!(%task, "succeeded"),
            RunEvent::TaskFailed {
                task,
                kind,
                message,
            } => warn!(%task, %kind, "failed: {}", message),
            RunEvent::TaskSkipped { task } => info!(%task, "skipped"),
            RunEvent::RunFinished { succeeded } => info!(succeeded, "all tasks settled"),
        }
    }
}
