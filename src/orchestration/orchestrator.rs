//! Orchestrator: dependency-ordered execution with failure propagation.
//!
//! One logical run-controller fans ready tasks out to concurrent
//! executor calls and fans their terminal results back in over a
//! channel. A task launches only when every predecessor has succeeded;
//! the lexicographically smallest ready name launches first. The first
//! failure marks the run failed, skips everything not yet started, and
//! lets in-flight work finish with its results discarded.

use crate::backend::JobRequest;
use crate::core::artifact::{ArtifactResolver, ResolvedInput};
use crate::core::dag::PipelineDag;
use crate::core::task::{FailureKind, TaskName, TaskRun, TaskRunState, TaskSpec};
use crate::definition::substitute;
use crate::error::{Error, Result};
use crate::executor::{ExecPhase, Executor};
use crate::storage::ObjectStorage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Events emitted by the orchestrator for task lifecycle changes.
///
/// These let external observers (CLI output, tests) react to state
/// changes without polling. Emission is best-effort: a dropped receiver
/// never stalls the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A task was accepted by the backend.
    TaskSubmitted {
        /// The task that was submitted.
        task: TaskName,
    },
    /// A task was first observed running.
    TaskRunning {
        /// The task that is running.
        task: TaskName,
    },
    /// A task reached a successful terminal state.
    TaskSucceeded {
        /// The task that succeeded.
        task: TaskName,
    },
    /// A task reached a failed terminal state.
    TaskFailed {
        /// The task that failed.
        task: TaskName,
        /// What kind of failure this was.
        kind: FailureKind,
        /// Human-readable description.
        message: String,
    },
    /// A task was skipped without ever being submitted.
    TaskSkipped {
        /// The task that was skipped.
        task: TaskName,
    },
    /// The run reached its terminal condition.
    RunFinished {
        /// True when every task succeeded.
        succeeded: bool,
    },
}

/// The single root cause surfaced at the run level.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RootCause {
    /// The task that failed first, if the cause is task-scoped.
    pub task: Option<TaskName>,
    /// The failure kind.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
}

/// Result of driving one DAG to its terminal condition.
#[derive(Debug)]
pub struct RunOutcome {
    /// Final task run records, one per task spec.
    pub runs: HashMap<TaskName, TaskRun>,
    /// First failure, if any. `None` means every task succeeded.
    pub root_cause: Option<RootCause>,
}

/// Messages fanned in from worker tasks.
enum WorkerMsg {
    Phase(ExecPhase),
    Finished(Result<()>),
}

/// The run controller.
pub struct Orchestrator {
    dag: Arc<PipelineDag>,
    resolver: Arc<RwLock<ArtifactResolver>>,
    storage: Arc<dyn ObjectStorage>,
    executor: Arc<Executor>,
    template_vars: HashMap<String, String>,
    max_concurrency: usize,
    cancel: CancellationToken,
    event_tx: mpsc::Sender<RunEvent>,
    runs: HashMap<TaskName, TaskRun>,
}

impl Orchestrator {
    /// Create an orchestrator over a validated DAG.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dag: Arc<PipelineDag>,
        resolver: Arc<RwLock<ArtifactResolver>>,
        storage: Arc<dyn ObjectStorage>,
        executor: Arc<Executor>,
        template_vars: HashMap<String, String>,
        max_concurrency: usize,
        cancel: CancellationToken,
        event_tx: mpsc::Sender<RunEvent>,
    ) -> Self {
        let runs = dag
            .task_names()
            .into_iter()
            .map(|name| (name.clone(), TaskRun::new(name)))
            .collect();
        Self {
            dag,
            resolver,
            storage,
            executor,
            template_vars,
            max_concurrency: max_concurrency.max(1),
            cancel,
            event_tx,
            runs,
        }
    }

    /// Snapshot of every task's current state.
    fn states(&self) -> HashMap<TaskName, TaskRunState> {
        self.runs
            .iter()
            .map(|(name, run)| (name.clone(), run.state.clone()))
            .collect()
    }

    /// Drive the DAG to its terminal condition: nothing in flight and
    /// nothing left in `NotStarted`.
    pub async fn run(mut self) -> RunOutcome {
        let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<(TaskName, WorkerMsg)>();
        let mut in_flight: HashSet<TaskName> = HashSet::new();
        let mut root_cause: Option<RootCause> = None;

        loop {
            if self.cancel.is_cancelled() && root_cause.is_none() {
                info!("cancellation requested");
                root_cause = Some(RootCause {
                    task: None,
                    kind: FailureKind::Cancelled,
                    message: "run cancelled".to_string(),
                });
            }

            if root_cause.is_none() {
                let launched = self.launch_ready(&mut in_flight, &msg_tx);
                let not_started = self.any_not_started();
                if in_flight.is_empty() && !not_started {
                    break;
                }
                if in_flight.is_empty() && launched == 0 && not_started {
                    // Unreachable after validation: an acyclic DAG with no
                    // failures always has a ready task. Terminate anyway.
                    warn!("no runnable tasks remain; skipping the rest");
                    self.skip_unstarted().await;
                    continue;
                }
            } else {
                self.skip_unstarted().await;
                if in_flight.is_empty() {
                    break;
                }
            }

            let Some((name, msg)) = msg_rx.recv().await else {
                break;
            };
            match msg {
                WorkerMsg::Phase(ExecPhase::Submitted) => {
                    self.advance(&name, TaskRunState::Submitted);
                    let _ = self
                        .event_tx
                        .send(RunEvent::TaskSubmitted { task: name })
                        .await;
                }
                WorkerMsg::Phase(ExecPhase::Running) => {
                    self.advance(&name, TaskRunState::Running);
                    let _ = self
                        .event_tx
                        .send(RunEvent::TaskRunning { task: name })
                        .await;
                }
                WorkerMsg::Finished(result) => {
                    in_flight.remove(&name);
                    self.handle_finished(name, result, &mut root_cause).await;
                }
            }
        }

        let succeeded = self.runs.values().all(TaskRun::succeeded);
        let _ = self.event_tx.send(RunEvent::RunFinished { succeeded }).await;
        RunOutcome {
            runs: self.runs,
            root_cause,
        }
    }

    /// Launch ready tasks, smallest name first, up to the concurrency
    /// limit. Returns how many were launched.
    fn launch_ready(
        &mut self,
        in_flight: &mut HashSet<TaskName>,
        msg_tx: &mpsc::UnboundedSender<(TaskName, WorkerMsg)>,
    ) -> usize {
        let ready = self.dag.ready_tasks(&self.states());
        let mut launched = 0;
        for name in ready {
            if in_flight.len() >= self.max_concurrency {
                break;
            }
            if in_flight.contains(&name) {
                continue;
            }
            self.launch(&name, msg_tx);
            in_flight.insert(name);
            launched += 1;
        }
        launched
    }

    /// Spawn one worker: resolve inputs, build the request, run it, and
    /// report the terminal result back over the channel.
    fn launch(&self, name: &TaskName, msg_tx: &mpsc::UnboundedSender<(TaskName, WorkerMsg)>) {
        let Some(spec) = self.dag.get(name).cloned() else {
            warn!(task = %name, "ready task missing from DAG");
            return;
        };
        info!(task = %name, "launching");

        let resolver = Arc::clone(&self.resolver);
        let storage = Arc::clone(&self.storage);
        let executor = Arc::clone(&self.executor);
        let vars = self.template_vars.clone();
        let cancel = self.cancel.child_token();
        let tx = msg_tx.clone();
        let task_name = name.clone();

        tokio::spawn(async move {
            let phase_tx = tx.clone();
            let phase_name = task_name.clone();
            let result = async {
                let (resolved, outputs) = {
                    let resolver = resolver.read().await;
                    let resolved = resolver.resolve(&spec, storage.as_ref()).await?;
                    let outputs = resolver.output_locations(&spec.name);
                    (resolved, outputs)
                };
                let request = build_request(&spec, &resolved, &outputs, &vars)?;
                executor
                    .run_task(request, &cancel, |phase| {
                        let _ = phase_tx.send((phase_name.clone(), WorkerMsg::Phase(phase)));
                    })
                    .await
            }
            .await;
            let _ = tx.send((task_name, WorkerMsg::Finished(result)));
        });
    }

    /// Record one worker's terminal result.
    async fn handle_finished(
        &mut self,
        name: TaskName,
        result: Result<()>,
        root_cause: &mut Option<RootCause>,
    ) {
        match result {
            Ok(()) => {
                self.advance(&name, TaskRunState::Succeeded);
                if root_cause.is_none() {
                    let mut resolver = self.resolver.write().await;
                    if let Err(e) = resolver.produce_outputs(&name) {
                        warn!(task = %name, "artifact registry conflict: {}", e);
                        *root_cause = Some(RootCause {
                            task: Some(name.clone()),
                            kind: FailureKind::Execution,
                            message: e.to_string(),
                        });
                    }
                } else {
                    // Run already failed: the work happened but nothing
                    // downstream may consume it.
                    info!(task = %name, "finished after run failure; result discarded");
                }
                let _ = self
                    .event_tx
                    .send(RunEvent::TaskSucceeded { task: name })
                    .await;
            }
            Err(e) => {
                let kind = failure_kind(&e);
                let message = e.to_string();
                self.advance(
                    &name,
                    TaskRunState::Failed {
                        kind,
                        message: message.clone(),
                    },
                );
                self.resolver.write().await.mark_missing(&name);
                warn!(task = %name, %kind, "task failed: {}", message);
                if root_cause.is_none() {
                    *root_cause = Some(RootCause {
                        task: Some(name.clone()),
                        kind,
                        message: message.clone(),
                    });
                }
                let _ = self
                    .event_tx
                    .send(RunEvent::TaskFailed {
                        task: name,
                        kind,
                        message,
                    })
                    .await;
            }
        }
    }

    /// Transition every `NotStarted` task to `Skipped`.
    async fn skip_unstarted(&mut self) {
        let to_skip: Vec<TaskName> = self
            .runs
            .values()
            .filter(|run| run.state == TaskRunState::NotStarted)
            .map(|run| run.task.clone())
            .collect();
        if to_skip.is_empty() {
            return;
        }
        {
            let mut resolver = self.resolver.write().await;
            for name in &to_skip {
                if let Some(run) = self.runs.get_mut(name) {
                    run.advance(TaskRunState::Skipped);
                }
                resolver.mark_missing(name);
            }
        }
        for name in to_skip {
            info!(task = %name, "skipped");
            let _ = self
                .event_tx
                .send(RunEvent::TaskSkipped { task: name })
                .await;
        }
    }

    /// Check whether any task is still `NotStarted`.
    fn any_not_started(&self) -> bool {
        self.runs
            .values()
            .any(|run| run.state == TaskRunState::NotStarted)
    }

    fn advance(&mut self, name: &TaskName, state: TaskRunState) {
        if let Some(run) = self.runs.get_mut(name) {
            run.advance(state);
        }
    }
}

/// Map an executor error to the failure kind recorded on the task run.
fn failure_kind(e: &Error) -> FailureKind {
    match e {
        Error::Submission(_) => FailureKind::Submission,
        Error::DeadlineExceeded(_) => FailureKind::DeadlineExceeded,
        Error::Cancelled => FailureKind::Cancelled,
        _ => FailureKind::Execution,
    }
}

/// Assemble the backend request: substitute run parameters into the
/// execution descriptor, then append resolved input and output
/// locations as `--name uri` argument pairs.
fn build_request(
    spec: &TaskSpec,
    resolved: &[ResolvedInput],
    outputs: &[(String, String)],
    vars: &HashMap<String, String>,
) -> Result<JobRequest> {
    let image = substitute(&spec.exec.image, vars)?;
    let command = spec
        .exec
        .command
        .iter()
        .map(|part| substitute(part, vars))
        .collect::<Result<Vec<_>>>()?;
    let mut args = spec
        .exec
        .args
        .iter()
        .map(|arg| substitute(arg, vars))
        .collect::<Result<Vec<_>>>()?;
    for input in resolved {
        args.push(format!("--{}", input.name));
        args.push(input.uri.clone());
    }
    for (output, uri) in outputs {
        args.push(format!("--{}", output));
        args.push(uri.clone());
    }
    Ok(JobRequest {
        task: spec.name.clone(),
        image,
        command,
        args,
    })
}
