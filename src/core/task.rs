//! Task data model for the pipeline DAG.
//!
//! A `TaskSpec` is the immutable definition of one unit of remote work:
//! what to run, which artifacts it consumes, and which artifact slots it
//! fills on success. A `TaskRun` is the mutable per-run record tracking a
//! spec through its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a task within a pipeline.
///
/// Tasks are addressed by name: names appear in definition files, in
/// declared input references, and in run reports. The orchestrator also
/// uses the name ordering as its deterministic scheduling tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskName(String);

impl TaskName {
    /// Create a task name from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Opaque execution descriptor for a task.
///
/// The orchestration core never interprets this beyond handing it to a
/// backend: the image, command, and arguments are the leaf job's business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSpec {
    /// Container image the job runs in.
    pub image: String,
    /// Command to invoke inside the image.
    pub command: Vec<String>,
    /// Arguments passed to the command. Resolved input/output locations
    /// are appended by the executor at submission time.
    pub args: Vec<String>,
}

impl ExecSpec {
    /// Create an execution descriptor.
    pub fn new(image: impl Into<String>, command: Vec<String>, args: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command,
            args,
        }
    }
}

/// Where a declared input comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum InputSource {
    /// A named output of another task in the same pipeline.
    TaskOutput {
        /// The producing task.
        task: TaskName,
        /// The output slot on the producing task.
        output: String,
    },
    /// A pre-existing artifact outside the pipeline, addressed directly.
    External {
        /// Storage URI of the artifact.
        uri: String,
    },
}

/// One declared input of a task: a local name bound to a source.
///
/// The local name becomes the argument flag handed to the job
/// (`--<name> <resolved location>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    /// Name the consuming job knows this input by.
    pub name: String,
    /// Where the artifact comes from.
    pub source: InputSource,
}

impl InputBinding {
    /// Bind an input name to another task's output.
    pub fn from_task(
        name: impl Into<String>,
        task: impl Into<TaskName>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: InputSource::TaskOutput {
                task: task.into(),
                output: output.into(),
            },
        }
    }

    /// Bind an input name to an external artifact URI.
    pub fn external(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: InputSource::External { uri: uri.into() },
        }
    }
}

/// Immutable definition of one unit of remote work.
///
/// Constructed once at pipeline-definition time. The DAG derives data
/// edges from `inputs` and ordering edges from `after`; the spec itself
/// never changes after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique name within the pipeline.
    pub name: TaskName,
    /// What to run. Treated as a black box by the core.
    pub exec: ExecSpec,
    /// Declared inputs, in argument order.
    pub inputs: Vec<InputBinding>,
    /// Named artifact slots this task fills on success.
    pub outputs: Vec<String>,
    /// Explicit predecessors beyond data dependencies.
    pub after: Vec<TaskName>,
}

impl TaskSpec {
    /// Create a task spec with no inputs, outputs, or explicit predecessors.
    pub fn new(name: impl Into<TaskName>, exec: ExecSpec) -> Self {
        Self {
            name: name.into(),
            exec,
            inputs: Vec::new(),
            outputs: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Add a declared input.
    pub fn with_input(mut self, input: InputBinding) -> Self {
        self.inputs.push(input);
        self
    }

    /// Add a declared output slot.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.outputs.push(output.into());
        self
    }

    /// Add an explicit ordering predecessor.
    pub fn with_after(mut self, predecessor: impl Into<TaskName>) -> Self {
        self.after.push(predecessor.into());
        self
    }

    /// Names of tasks this spec depends on, data and ordering edges alike.
    pub fn predecessor_names(&self) -> Vec<TaskName> {
        let mut names: Vec<TaskName> = self
            .inputs
            .iter()
            .filter_map(|binding| match &binding.source {
                InputSource::TaskOutput { task, .. } => Some(task.clone()),
                InputSource::External { .. } => None,
            })
            .collect();
        names.extend(self.after.iter().cloned());
        names.sort();
        names.dedup();
        names
    }
}

/// Why a task run failed.
///
/// Recorded on the failed `TaskRun` and, for the first failure in a run,
/// as the run-level root cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backend rejected the job; retries were exhausted.
    Submission,
    /// The job ran and reported failure. Never retried automatically.
    Execution,
    /// Polling exceeded the configured timeout.
    DeadlineExceeded,
    /// The run was cancelled while the task was in flight.
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Submission => write!(f, "submission"),
            FailureKind::Execution => write!(f, "execution"),
            FailureKind::DeadlineExceeded => write!(f, "deadline_exceeded"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// State of one task run within a pipeline run.
///
/// Transitions are monotonic: `NotStarted -> Submitted -> Running ->
/// {Succeeded | Failed}`, or `NotStarted -> Skipped` when a predecessor
/// failed. No state ever regresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskRunState {
    /// Not yet handed to the executor.
    NotStarted,
    /// Accepted by the backend, not yet observed running.
    Submitted,
    /// Observed running on the backend.
    Running,
    /// Reached a successful terminal state.
    Succeeded,
    /// Reached a failed terminal state.
    Failed {
        /// What kind of failure this was.
        kind: FailureKind,
        /// Human-readable description.
        message: String,
    },
    /// Never submitted because a predecessor failed or the run stopped.
    Skipped,
}

impl TaskRunState {
    /// Rank used to enforce monotonic transitions. Terminal states share
    /// the top rank; moving between them would be a regression.
    fn rank(&self) -> u8 {
        match self {
            TaskRunState::NotStarted => 0,
            TaskRunState::Submitted => 1,
            TaskRunState::Running => 2,
            TaskRunState::Succeeded | TaskRunState::Failed { .. } | TaskRunState::Skipped => 3,
        }
    }

    /// Check if this state is terminal.
    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }
}

impl std::fmt::Display for TaskRunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskRunState::NotStarted => write!(f, "not_started"),
            TaskRunState::Submitted => write!(f, "submitted"),
            TaskRunState::Running => write!(f, "running"),
            TaskRunState::Succeeded => write!(f, "succeeded"),
            TaskRunState::Failed { kind, message } => write!(f, "failed ({kind}): {message}"),
            TaskRunState::Skipped => write!(f, "skipped"),
        }
    }
}

/// One execution attempt of a `TaskSpec` within a pipeline run.
///
/// Owned exclusively by the orchestrator for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    /// The task this run belongs to.
    pub task: TaskName,
    /// Current lifecycle state.
    pub state: TaskRunState,
    /// When the run record was created.
    pub created_at: DateTime<Utc>,
    /// When the task was submitted to the backend.
    pub submitted_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRun {
    /// Create a run record in `NotStarted`.
    pub fn new(task: TaskName) -> Self {
        Self {
            task,
            state: TaskRunState::NotStarted,
            created_at: Utc::now(),
            submitted_at: None,
            finished_at: None,
        }
    }

    /// Advance to a new state, ignoring regressions.
    ///
    /// A terminal state is sticky: once reached, later transitions are
    /// dropped. This is what makes duplicate completion reports harmless.
    pub fn advance(&mut self, next: TaskRunState) {
        if self.state.is_terminal() || next.rank() < self.state.rank() {
            return;
        }
        match &next {
            TaskRunState::Submitted => self.submitted_at = Some(Utc::now()),
            s if s.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        self.state = next;
    }

    /// Check if the run succeeded.
    pub fn succeeded(&self) -> bool {
        self.state == TaskRunState::Succeeded
    }
}
