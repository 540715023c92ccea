//! Local process execution backend.
//!
//! Runs each job's command as a host process, which makes a pipeline
//! definition exercisable end-to-end without cloud credentials. The
//! container image in the request is ignored; the command must exist on
//! the host. Terminal results are cached per handle so re-polling a
//! finished job is idempotent.

use crate::backend::{JobBackend, JobHandle, JobRequest, JobState};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct JobEntry {
    state: JobState,
    kill: CancellationToken,
}

/// Backend that executes jobs as local processes.
pub struct LocalBackend {
    jobs: Arc<Mutex<HashMap<JobHandle, JobEntry>>>,
}

impl LocalBackend {
    /// Create a local backend with no jobs.
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobBackend for LocalBackend {
    async fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        let (program, rest) = request
            .command
            .split_first()
            .ok_or_else(|| Error::Submission(format!("task '{}' has an empty command", request.task)))?;

        let mut child = Command::new(program)
            .args(rest)
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Submission(format!("failed to spawn '{}': {}", program, e)))?;

        let handle = JobHandle::new();
        let kill = CancellationToken::new();
        {
            let mut jobs = self.jobs.lock().await;
            jobs.insert(
                handle,
                JobEntry {
                    state: JobState::Running,
                    kill: kill.clone(),
                },
            );
        }
        debug!(task = %request.task, job = %handle.short(), "spawned local process");

        let jobs = Arc::clone(&self.jobs);
        tokio::spawn(async move {
            let terminal = tokio::select! {
                status = child.wait() => match status {
                    Ok(s) if s.success() => JobState::Succeeded,
                    Ok(s) => JobState::Failed {
                        message: match s.code() {
                            Some(code) => format!("process exited with code {}", code),
                            None => "process terminated by signal".to_string(),
                        },
                    },
                    Err(e) => JobState::Failed {
                        message: format!("wait failed: {}", e),
                    },
                },
                _ = kill.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!(job = %handle.short(), "kill failed: {}", e);
                    }
                    JobState::Failed {
                        message: "cancelled by request".to_string(),
                    }
                }
            };
            let mut jobs = jobs.lock().await;
            if let Some(entry) = jobs.get_mut(&handle) {
                entry.state = terminal;
            }
        });

        Ok(handle)
    }

    async fn status(&self, handle: &JobHandle) -> Result<JobState> {
        let jobs = self.jobs.lock().await;
        jobs.get(handle)
            .map(|entry| entry.state.clone())
            .ok_or_else(|| Error::Execution(format!("unknown job handle {}", handle)))
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        let jobs = self.jobs.lock().await;
        let entry = jobs
            .get(handle)
            .ok_or_else(|| Error::Execution(format!("unknown job handle {}", handle)))?;
        entry.kill.cancel();
        Ok(())
    }
}
