//! Orchestration layer: the run controller that walks the DAG.

mod orchestrator;

pub use orchestrator::{Orchestrator, RootCause, RunEvent, RunOutcome};
