//! Run parameters.
//!
//! Everything a pipeline run needs is threaded through this struct; no
//! bucket name or project id lives in code or process-wide state. The
//! required identifiers have no defaults and are validated up front; the
//! tunables default to values suitable for long-running remote jobs.

use crate::executor::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

fn default_max_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_task_timeout_secs() -> u64 {
    3_600
}

fn default_submit_attempts() -> u32 {
    3
}

fn default_submit_base_delay_ms() -> u64 {
    500
}

/// Parameters binding a pipeline definition to one concrete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParams {
    /// Project identifier, available to definitions as `{project}`.
    #[serde(default)]
    pub project: String,
    /// Region identifier, available as `{region}`.
    #[serde(default)]
    pub region: String,
    /// Storage prefix under which every artifact location is derived,
    /// available as `{storage_root}`.
    #[serde(default)]
    pub storage_root: String,
    /// Default execution image, available as `{image}`.
    #[serde(default)]
    pub image: String,
    /// Upper bound on concurrently in-flight tasks.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Interval between backend status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-task deadline; exceeding it cancels the job.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Submission attempts before giving up, including the first.
    #[serde(default = "default_submit_attempts")]
    pub submit_attempts: u32,
    /// Backoff before the second submission attempt; doubles per retry.
    #[serde(default = "default_submit_base_delay_ms")]
    pub submit_base_delay_ms: u64,
}

impl RunParams {
    /// Create params with the required identifiers and default tunables.
    pub fn new(
        project: impl Into<String>,
        region: impl Into<String>,
        storage_root: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            region: region.into(),
            storage_root: storage_root.into(),
            image: image.into(),
            max_concurrency: default_max_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            task_timeout_secs: default_task_timeout_secs(),
            submit_attempts: default_submit_attempts(),
            submit_base_delay_ms: default_submit_base_delay_ms(),
        }
    }

    /// Load params from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let params: Self = toml::from_str(&fs::read_to_string(path)?)?;
        Ok(params)
    }

    /// Fail fast on absent required identifiers or nonsensical tunables.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        for (field, value) in [
            ("project", &self.project),
            ("region", &self.region),
            ("storage_root", &self.storage_root),
            ("image", &self.image),
        ] {
            if value.trim().is_empty() {
                missing.push(field);
            }
        }
        if !missing.is_empty() {
            return Err(Error::InvalidParameters(format!(
                "missing required parameters: {}",
                missing.join(", ")
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidParameters(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.task_timeout_secs == 0 {
            return Err(Error::InvalidParameters(
                "task_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Variables visible to `{name}` templates in definitions.
    pub fn template_vars(&self) -> HashMap<String, String> {
        HashMap::from([
            ("project".to_string(), self.project.clone()),
            ("region".to_string(), self.region.clone()),
            ("storage_root".to_string(), self.storage_root.clone()),
            ("image".to_string(), self.image.clone()),
        ])
    }

    /// Submission retry policy derived from the tunables.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.submit_attempts,
            base_delay: Duration::from_millis(self.submit_base_delay_ms),
            ..RetryPolicy::default()
        }
    }

    /// Status poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-task deadline.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}
