//! Executor: runs exactly one task to a terminal state.
//!
//! Submission and awaiting are separate concerns with separate failure
//! modes. A rejected submission is retried with bounded exponential
//! backoff; a job that ran and failed is surfaced as-is, never retried.
//! The await loop is the one legitimate suspension point in the system:
//! a cancellable poll with a deadline, never an uninterruptible sleep.

use crate::backend::{JobBackend, JobHandle, JobRequest, JobState};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff policy for submission retries.
///
/// Only submissions are retried: the backend rejected the job before it
/// ran, so retrying cannot mask a data problem the way re-running a
/// failed job could.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total submission attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after the given 1-based attempt number.
    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Observable milestones of one task execution.
///
/// Reported through the `on_phase` callback so the orchestrator can move
/// the task run through `Submitted` and `Running` as they actually
/// happen on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPhase {
    /// The backend accepted the submission.
    Submitted,
    /// The job was first observed running.
    Running,
}

/// Runs one job request against a backend, to a terminal state.
pub struct Executor {
    backend: Arc<dyn JobBackend>,
    retry: RetryPolicy,
    poll_interval: Duration,
    timeout: Duration,
}

impl Executor {
    /// Create an executor.
    pub fn new(
        backend: Arc<dyn JobBackend>,
        retry: RetryPolicy,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            retry,
            poll_interval,
            timeout,
        }
    }

    /// Run a fully-resolved job to completion.
    ///
    /// Returns `Ok(())` on success. Failures come back as the error kind
    /// the orchestrator records on the task run: `Submission` (retries
    /// exhausted), `Execution` (job ran and failed), `DeadlineExceeded`
    /// (timed out while polling), or `Cancelled`.
    pub async fn run_task<F>(
        &self,
        request: JobRequest,
        cancel: &CancellationToken,
        mut on_phase: F,
    ) -> Result<()>
    where
        F: FnMut(ExecPhase) + Send,
    {
        let handle = self.submit_with_retry(&request, cancel).await?;
        on_phase(ExecPhase::Submitted);
        self.await_terminal(&request, &handle, cancel, &mut on_phase)
            .await
    }

    /// Submit with bounded exponential backoff.
    async fn submit_with_retry(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobHandle> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.backend.submit(request.clone()).await {
                Ok(handle) => {
                    debug!(task = %request.task, job = %handle.short(), attempt, "submitted");
                    return Ok(handle);
                }
                Err(e) if attempt < attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        task = %request.task,
                        attempt,
                        "submission rejected, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    return Err(Error::Submission(format!(
                        "task '{}' rejected after {} attempts: {}",
                        request.task, attempts, e
                    )));
                }
            }
        }
    }

    /// Poll the handle until terminal, the deadline passes, or the run is
    /// cancelled. Re-polling a terminal handle is the backend's contract
    /// to keep idempotent.
    async fn await_terminal<F>(
        &self,
        request: &JobRequest,
        handle: &JobHandle,
        cancel: &CancellationToken,
        on_phase: &mut F,
    ) -> Result<()>
    where
        F: FnMut(ExecPhase) + Send,
    {
        let deadline = Instant::now() + self.timeout;
        let mut seen_running = false;
        loop {
            if cancel.is_cancelled() {
                self.best_effort_cancel(request, handle).await;
                return Err(Error::Cancelled);
            }

            match self.backend.status(handle).await? {
                JobState::Succeeded => return Ok(()),
                JobState::Failed { message } => return Err(Error::Execution(message)),
                JobState::Running => {
                    if !seen_running {
                        seen_running = true;
                        on_phase(ExecPhase::Running);
                    }
                }
                JobState::Queued => {}
            }

            let now = Instant::now();
            if now >= deadline {
                self.best_effort_cancel(request, handle).await;
                return Err(Error::DeadlineExceeded(self.timeout));
            }

            let wait = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.best_effort_cancel(request, handle).await;
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Attempt remote cancellation; a failure here is logged and never
    /// masks the error that triggered it.
    async fn best_effort_cancel(&self, request: &JobRequest, handle: &JobHandle) {
        if let Err(e) = self.backend.cancel(handle).await {
            warn!(task = %request.task, job = %handle.short(), "cancellation failed: {}", e);
        }
    }
}
