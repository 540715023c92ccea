use crate::core::task::TaskName;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Duplicate task name: {0}")]
    DuplicateTaskName(TaskName),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskName),

    #[error("Cycle detected: {}", format_cycle(.path))]
    CycleDetected { path: Vec<TaskName> },

    #[error("Input '{input}' of task '{task}' does not resolve to a produced artifact")]
    UnresolvedInput { task: TaskName, input: String },

    #[error("External artifact not found at {uri}")]
    ExternalArtifactMissing { uri: String },

    #[error("Artifact '{output}' of task '{task}' already produced at a different location")]
    ArtifactConflict { task: TaskName, output: String },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid pipeline definition: {0}")]
    Definition(String),

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

fn format_cycle(path: &[TaskName]) -> String {
    path.iter()
        .map(|n| n.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, Error>;
