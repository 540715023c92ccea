//! Remote execution backends.
//!
//! A backend accepts a job submission and returns a handle; the handle
//! supports a status query and best-effort cancellation. The executor is
//! the only consumer. Backends must make terminal status queries
//! idempotent: re-polling a finished handle returns the same terminal
//! state without side effects.

mod local;

pub use local::LocalBackend;

use crate::core::task::TaskName;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque handle to a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub Uuid);

impl JobHandle {
    /// Create a new unique job handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote job state as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobState {
    /// Accepted, waiting for resources.
    Queued,
    /// Running on the backend.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed {
        /// Backend-reported failure description.
        message: String,
    },
}

impl JobState {
    /// Check if the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed { .. })
    }
}

/// A fully-resolved job submission.
///
/// By the time a request reaches a backend, parameter templates are
/// substituted and input/output locations are appended to `args`; the
/// backend runs it as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Task this job executes, for labeling and logs.
    pub task: TaskName,
    /// Container image to run.
    pub image: String,
    /// Command to invoke.
    pub command: Vec<String>,
    /// Full argument list, resolved locations included.
    pub args: Vec<String>,
}

/// Execution backend consumed by the executor.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Submit a job. Returns a handle on acceptance; an error here is a
    /// submission failure (backend unreachable, malformed request),
    /// distinct from the job itself failing.
    async fn submit(&self, request: JobRequest) -> Result<JobHandle>;

    /// Query the state of a submitted job. Idempotent for terminal
    /// handles.
    async fn status(&self, handle: &JobHandle) -> Result<JobState>;

    /// Best-effort cancellation of a submitted job.
    async fn cancel(&self, handle: &JobHandle) -> Result<()>;
}
