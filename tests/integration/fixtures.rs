//! Test fixtures for integration tests.
//!
//! Provides:
//! - `StubBackend`: an in-memory scripted backend that records the
//!   submission/completion sequence and the concurrency high-water mark
//! - Predefined pipeline shapes mirroring the churn demo
//! - Fast run parameters suitable for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use stratus::backend::{JobBackend, JobHandle, JobRequest, JobState};
use stratus::core::dag::PipelineDag;
use stratus::core::task::{ExecSpec, InputBinding, TaskName, TaskSpec};
use stratus::error::{Error, Result};
use stratus::storage::FsStorage;
use stratus::{PipelineRun, RunParams};

/// What the stub backend does with one task's jobs.
#[derive(Debug, Clone)]
pub enum TaskPlan {
    /// Report Running until the delay elapses, then Succeeded.
    Succeed { delay: Duration },
    /// Report Running until the delay elapses, then Failed.
    Fail {
        message: &'static str,
        delay: Duration,
    },
    /// Reject the first `times` submissions, then behave like Succeed.
    RejectSubmission { times: u32 },
    /// Report Running until cancelled.
    Hang,
}

impl TaskPlan {
    pub fn succeed() -> Self {
        Self::Succeed {
            delay: Duration::ZERO,
        }
    }

    pub fn fail(message: &'static str) -> Self {
        Self::Fail {
            message,
            delay: Duration::ZERO,
        }
    }
}

/// Observable backend history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Submitted(TaskName),
    Finished(TaskName, bool),
}

struct JobRecord {
    task: TaskName,
    started: Instant,
    terminal: Option<JobState>,
    request: JobRequest,
}

/// In-memory backend scripted per task name.
pub struct StubBackend {
    plans: Mutex<HashMap<TaskName, TaskPlan>>,
    jobs: Mutex<HashMap<JobHandle, JobRecord>>,
    log: Mutex<Vec<BackendEvent>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl StubBackend {
    pub fn new(plans: Vec<(&str, TaskPlan)>) -> Self {
        Self {
            plans: Mutex::new(
                plans
                    .into_iter()
                    .map(|(name, plan)| (TaskName::new(name), plan))
                    .collect(),
            ),
            jobs: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    fn plan_for(&self, task: &TaskName) -> TaskPlan {
        self.plans
            .lock()
            .unwrap()
            .get(task)
            .cloned()
            .unwrap_or_else(TaskPlan::succeed)
    }

    /// Full submission/completion history, in order.
    pub fn events(&self) -> Vec<BackendEvent> {
        self.log.lock().unwrap().clone()
    }

    /// Tasks in the order their submissions were accepted.
    pub fn submitted_order(&self) -> Vec<TaskName> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                BackendEvent::Submitted(task) => Some(task),
                _ => None,
            })
            .collect()
    }

    /// High-water mark of concurrently running jobs.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// The request submitted for a task, if any.
    pub fn request_for(&self, task: &TaskName) -> Option<JobRequest> {
        let jobs = self.jobs.lock().unwrap();
        jobs.values()
            .find(|record| &record.task == task)
            .map(|record| record.request.clone())
    }

    fn finish(&self, record: &mut JobRecord, state: JobState) {
        let succeeded = state == JobState::Succeeded;
        record.terminal = Some(state);
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push(BackendEvent::Finished(record.task.clone(), succeeded));
    }
}

#[async_trait]
impl JobBackend for StubBackend {
    async fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        {
            let mut plans = self.plans.lock().unwrap();
            if let Some(TaskPlan::RejectSubmission { times }) = plans.get_mut(&request.task) {
                if *times > 0 {
                    *times -= 1;
                    return Err(Error::Submission("backend unreachable".to_string()));
                }
            }
        }
        let handle = JobHandle::new();
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push(BackendEvent::Submitted(request.task.clone()));
        self.jobs.lock().unwrap().insert(
            handle,
            JobRecord {
                task: request.task.clone(),
                started: Instant::now(),
                terminal: None,
                request,
            },
        );
        Ok(handle)
    }

    async fn status(&self, handle: &JobHandle) -> Result<JobState> {
        let mut jobs = self.jobs.lock().unwrap();
        let record = jobs
            .get_mut(handle)
            .ok_or_else(|| Error::Execution(format!("unknown job handle {}", handle)))?;
        if let Some(terminal) = &record.terminal {
            return Ok(terminal.clone());
        }
        let state = match self.plan_for(&record.task) {
            TaskPlan::Succeed { delay } if record.started.elapsed() >= delay => JobState::Succeeded,
            TaskPlan::RejectSubmission { .. } => JobState::Succeeded,
            TaskPlan::Fail { message, delay } if record.started.elapsed() >= delay => {
                JobState::Failed {
                    message: message.to_string(),
                }
            }
            _ => JobState::Running,
        };
        if state.is_terminal() {
            self.finish(record, state.clone());
        }
        Ok(state)
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(record) = jobs.get_mut(handle) {
            if record.terminal.is_none() {
                self.finish(
                    record,
                    JobState::Failed {
                        message: "cancelled".to_string(),
                    },
                );
            }
        }
        Ok(())
    }
}

/// The churn demo shape: preprocess -> train -> register.
pub fn churn_specs() -> Vec<TaskSpec> {
    vec![
        TaskSpec::new(
            "preprocess",
            ExecSpec::new(
                "{image}",
                vec!["python".to_string(), "preprocess.py".to_string()],
                vec!["--project_id".to_string(), "{project}".to_string()],
            ),
        )
        .with_output("train")
        .with_output("test"),
        TaskSpec::new(
            "train",
            ExecSpec::new(
                "{image}",
                vec!["python".to_string(), "train.py".to_string()],
                vec![],
            ),
        )
        .with_input(InputBinding::from_task("train_file", "preprocess", "train"))
        .with_input(InputBinding::from_task("test_file", "preprocess", "test"))
        .with_output("model"),
        TaskSpec::new(
            "register",
            ExecSpec::new(
                "{image}",
                vec!["python".to_string(), "register.py".to_string()],
                vec!["--region".to_string(), "{region}".to_string()],
            ),
        )
        .with_input(InputBinding::from_task("model", "train", "model"))
        .with_after("train"),
    ]
}

/// Parameters with test-friendly poll/timeout/retry tunables.
pub fn fast_params(storage_root: &str) -> RunParams {
    let mut params = RunParams::new("demo-project", "local", storage_root, "trainer:v1");
    params.poll_interval_ms = 5;
    params.task_timeout_secs = 5;
    params.submit_attempts = 3;
    params.submit_base_delay_ms = 1;
    params
}

/// Build a pipeline run over the stub backend.
pub fn stub_run(
    specs: Vec<TaskSpec>,
    plans: Vec<(&str, TaskPlan)>,
    params: RunParams,
) -> (PipelineRun, Arc<StubBackend>) {
    let dag = PipelineDag::from_specs(specs).expect("specs build into a DAG");
    let backend = Arc::new(StubBackend::new(plans));
    let run = PipelineRun::new(
        "test-pipeline",
        dag,
        params,
        Arc::clone(&backend) as Arc<dyn JobBackend>,
        Arc::new(FsStorage::new()),
    )
    .expect("run construction succeeds");
    (run, backend)
}
