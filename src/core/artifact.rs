//! Artifact registry and resolution.
//!
//! Every declared task output is an artifact slot with a deterministic
//! storage URI derived from the run's storage root. Locations are
//! computable before anything runs, so a task can be told where to write
//! as a plain argument; downstream tasks reference the slot, never a
//! hard-coded path. A slot flips to Produced exactly once, when its
//! owning task succeeds.

use crate::core::dag::PipelineDag;
use crate::core::task::{InputSource, TaskName, TaskSpec};
use crate::error::{Error, Result};
use crate::storage::ObjectStorage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of an artifact slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// Declared, owning task has not succeeded yet.
    Pending,
    /// Owning task succeeded; the location is readable.
    Produced,
    /// Owning task reached a failed terminal state; never produced.
    Missing,
}

/// A resolved input ready to hand to a job as an argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInput {
    /// The input name the job knows.
    pub name: String,
    /// Concrete storage URI.
    pub uri: String,
}

#[derive(Debug, Clone)]
struct Slot {
    uri: String,
    status: ArtifactStatus,
}

/// Registry of artifact slots for one pipeline run.
///
/// This is the only state mutated by concurrent task completions; the
/// orchestrator serializes access behind a lock. Producing a slot is
/// at-most-once: re-producing with the identical URI is an idempotent
/// no-op, a different URI is an error.
pub struct ArtifactResolver {
    root: String,
    slots: HashMap<(TaskName, String), Slot>,
}

impl ArtifactResolver {
    /// Create an empty registry rooted at a storage prefix.
    pub fn new(storage_root: impl Into<String>) -> Self {
        let mut root = storage_root.into();
        while root.ends_with('/') {
            root.pop();
        }
        Self {
            root,
            slots: HashMap::new(),
        }
    }

    /// Create a registry with every output of every task in the DAG
    /// declared Pending.
    pub fn for_dag(storage_root: impl Into<String>, dag: &PipelineDag) -> Self {
        let mut resolver = Self::new(storage_root);
        for spec in dag.specs() {
            for output in &spec.outputs {
                resolver.declare(&spec.name, output);
            }
        }
        resolver
    }

    /// Deterministic location for a task output: `{root}/{task}/{output}`.
    pub fn location_for(&self, task: &TaskName, output: &str) -> String {
        format!("{}/{}/{}", self.root, task, output)
    }

    /// Register an output slot, status Pending. Idempotent.
    pub fn declare(&mut self, task: &TaskName, output: &str) -> String {
        let uri = self.location_for(task, output);
        self.slots
            .entry((task.clone(), output.to_string()))
            .or_insert_with(|| Slot {
                uri: uri.clone(),
                status: ArtifactStatus::Pending,
            });
        uri
    }

    /// Status of a declared slot.
    pub fn status(&self, task: &TaskName, output: &str) -> Option<ArtifactStatus> {
        self.slots
            .get(&(task.clone(), output.to_string()))
            .map(|slot| slot.status)
    }

    /// All declared output locations of a task, in declaration-key order.
    pub fn output_locations(&self, task: &TaskName) -> Vec<(String, String)> {
        let mut outputs: Vec<(String, String)> = self
            .slots
            .iter()
            .filter(|((owner, _), _)| owner == task)
            .map(|((_, output), slot)| (output.clone(), slot.uri.clone()))
            .collect();
        outputs.sort();
        outputs
    }

    /// Mark one slot Produced at the given URI.
    ///
    /// # Errors
    /// `ArtifactConflict` if the slot was already produced at (or is
    /// declared at) a different location. Re-marking with the same URI
    /// is a no-op.
    pub fn mark_produced(&mut self, task: &TaskName, output: &str, uri: &str) -> Result<()> {
        let slot = self
            .slots
            .get_mut(&(task.clone(), output.to_string()))
            .ok_or_else(|| Error::Storage(format!("undeclared artifact slot {}/{}", task, output)))?;
        if slot.uri != uri {
            return Err(Error::ArtifactConflict {
                task: task.clone(),
                output: output.to_string(),
            });
        }
        slot.status = ArtifactStatus::Produced;
        Ok(())
    }

    /// Mark every slot of a task Produced. Called when the task succeeds.
    pub fn produce_outputs(&mut self, task: &TaskName) -> Result<()> {
        for (output, uri) in self.output_locations(task) {
            self.mark_produced(task, &output, &uri)?;
        }
        Ok(())
    }

    /// Mark every still-pending slot of a task Missing. Called when the
    /// task reaches a failed terminal state.
    pub fn mark_missing(&mut self, task: &TaskName) {
        for slot in self
            .slots
            .iter_mut()
            .filter(|((owner, _), _)| owner == task)
            .map(|(_, slot)| slot)
        {
            if slot.status == ArtifactStatus::Pending {
                slot.status = ArtifactStatus::Missing;
            }
        }
    }

    /// Resolve every declared input of a task to a concrete location.
    ///
    /// Called immediately before submission. Read-after-write consistent
    /// with the task's own predecessors: the orchestrator only calls this
    /// once every predecessor has succeeded and its slots are Produced.
    ///
    /// # Errors
    /// `UnresolvedInput` if a referenced slot is not Produced;
    /// `ExternalArtifactMissing` if an external URI fails the storage
    /// existence check.
    pub async fn resolve(
        &self,
        spec: &TaskSpec,
        storage: &dyn ObjectStorage,
    ) -> Result<Vec<ResolvedInput>> {
        let mut resolved = Vec::with_capacity(spec.inputs.len());
        for binding in &spec.inputs {
            let uri = match &binding.source {
                InputSource::TaskOutput { task, output } => {
                    let slot = self
                        .slots
                        .get(&(task.clone(), output.clone()))
                        .filter(|slot| slot.status == ArtifactStatus::Produced)
                        .ok_or_else(|| Error::UnresolvedInput {
                            task: spec.name.clone(),
                            input: binding.name.clone(),
                        })?;
                    slot.uri.clone()
                }
                InputSource::External { uri } => {
                    if !storage.exists(uri).await? {
                        return Err(Error::ExternalArtifactMissing { uri: uri.clone() });
                    }
                    uri.clone()
                }
            };
            resolved.push(ResolvedInput {
                name: binding.name.clone(),
                uri,
            });
        }
        Ok(resolved)
    }
}

impl std::fmt::Debug for ArtifactResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactResolver")
            .field("root", &self.root)
            .field("slots", &self.slots.len())
            .finish()
    }
}
