//! Steps and their execution instances.

use super::{CommandSpec, StepError, StepStatus};
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One unit of work for one worker service.
///
/// A step is declared once but may execute as several parallel instances
/// when the planner fans it out over a collection-valued input. Instance
/// statuses are tracked independently; the step-level status is derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Stable name, unique within the job.
    pub name: String,
    /// Routing key to a worker queue (e.g. "flucoma_service").
    pub service: String,
    /// Operation key within the service's manifest.
    pub operation: String,
    /// Command template, opaque to the engine.
    pub command_spec: CommandSpec,
    /// Storage policy hint, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_policy: Option<String>,
    /// Input placeholder -> literal or template.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Output placeholder -> destination template.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Operation parameters, validated against the manifest.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Execution instances; exactly one until a fan-out expands the step.
    #[serde(default)]
    pub instances: Vec<StepInstance>,
    /// True once the planner has materialised fan-out instances.
    #[serde(default)]
    pub expanded: bool,
}

/// One execution instance of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInstance {
    /// Instance index; 0 for non-fanned steps.
    pub index: u32,
    /// Current status.
    #[serde(default)]
    pub status: StepStatus,
    /// Input placeholder -> fully bound value (string ref or list for joins).
    #[serde(default)]
    pub resolved_inputs: BTreeMap<String, serde_json::Value>,
    /// Output placeholder -> produced reference.
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Output placeholder -> content checksum, as reported by the worker.
    #[serde(default)]
    pub output_checksums: BTreeMap<String, String>,
    /// Cache key, when the operation is deterministic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    /// Structured error when the instance failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// When the dispatch message was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<Timestamp>,
    /// When a worker first reported progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the instance reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Deadline after which the sweeper reaps the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Timestamp>,
}

impl StepInstance {
    /// Creates a pending instance with the given index.
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self {
            index,
            status: StepStatus::Pending,
            resolved_inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            output_checksums: BTreeMap::new(),
            cache_key: None,
            error: None,
            dispatched_at: None,
            started_at: None,
            finished_at: None,
            deadline: None,
        }
    }

    /// Marks the instance ready with its bound inputs.
    pub fn mark_ready(&mut self, resolved_inputs: BTreeMap<String, serde_json::Value>) {
        self.status = StepStatus::Ready;
        self.resolved_inputs = resolved_inputs;
    }

    /// Marks the instance dispatched and stamps its deadline.
    pub fn mark_dispatched(&mut self, deadline: Option<Timestamp>) {
        self.status = StepStatus::Dispatched;
        self.dispatched_at = Some(now_utc());
        self.deadline = deadline;
    }

    /// Marks the instance as picked up by a worker.
    pub fn mark_processing(&mut self) {
        self.status = StepStatus::Processing;
        self.started_at = Some(now_utc());
    }

    /// Marks the instance complete with its produced outputs.
    pub fn mark_complete(
        &mut self,
        outputs: BTreeMap<String, serde_json::Value>,
        output_checksums: BTreeMap<String, String>,
    ) {
        self.status = StepStatus::Complete;
        self.outputs = outputs;
        self.output_checksums = output_checksums;
        self.finished_at = Some(now_utc());
    }

    /// Marks the instance failed with a structured error.
    pub fn mark_failed(&mut self, error: StepError) {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(now_utc());
    }

    /// Marks the instance satisfied from the cache.
    pub fn mark_skipped_cached(&mut self, outputs: BTreeMap<String, serde_json::Value>) {
        self.status = StepStatus::SkippedCached;
        self.outputs = outputs;
        self.finished_at = Some(now_utc());
    }

    /// Resets the instance to pending, clearing all execution state.
    pub fn reset(&mut self) {
        *self = Self::new(self.index);
    }
}

impl Step {
    /// Creates a new step with a single pending instance.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        service: impl Into<String>,
        operation: impl Into<String>,
        command_spec: CommandSpec,
    ) -> Self {
        Self {
            name: name.into(),
            service: service.into(),
            operation: operation.into(),
            command_spec,
            storage_policy: None,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            parameters: BTreeMap::new(),
            instances: vec![StepInstance::new(0)],
            expanded: false,
        }
    }

    /// Adds an input binding (literal or template).
    #[must_use]
    pub fn with_input(mut self, placeholder: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(placeholder.into(), value.into());
        self
    }

    /// Adds an output destination template.
    #[must_use]
    pub fn with_output(
        mut self,
        placeholder: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        self.outputs.insert(placeholder.into(), template.into());
        self
    }

    /// Adds an operation parameter.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Sets the storage policy hint.
    #[must_use]
    pub fn with_storage_policy(mut self, policy: impl Into<String>) -> Self {
        self.storage_policy = Some(policy.into());
        self
    }

    /// Returns the instance with the given index.
    #[must_use]
    pub fn instance(&self, index: u32) -> Option<&StepInstance> {
        self.instances.iter().find(|i| i.index == index)
    }

    /// Returns the instance with the given index, mutably.
    pub fn instance_mut(&mut self, index: u32) -> Option<&mut StepInstance> {
        self.instances.iter_mut().find(|i| i.index == index)
    }

    /// Derives the step-level status from its instances.
    ///
    /// Failure dominates; any in-flight instance keeps the step in
    /// flight; the step is only terminal-success once every instance is.
    #[must_use]
    pub fn status(&self) -> StepStatus {
        if self.instances.is_empty() {
            // A fan-out over an empty collection has no work to do.
            return StepStatus::Complete;
        }
        if self.instances.iter().any(|i| i.status == StepStatus::Failed) {
            return StepStatus::Failed;
        }
        if self
            .instances
            .iter()
            .any(|i| i.status == StepStatus::Processing)
        {
            return StepStatus::Processing;
        }
        if self
            .instances
            .iter()
            .any(|i| i.status == StepStatus::Dispatched)
        {
            return StepStatus::Dispatched;
        }
        if self.instances.iter().any(|i| i.status == StepStatus::Ready) {
            return StepStatus::Ready;
        }
        if self.instances.iter().all(|i| i.status.is_success()) {
            if self
                .instances
                .iter()
                .all(|i| i.status == StepStatus::SkippedCached)
            {
                return StepStatus::SkippedCached;
            }
            return StepStatus::Complete;
        }
        StepStatus::Pending
    }

    /// Returns true if every instance finished successfully.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.instances.iter().all(|i| i.status.is_success())
    }

    /// Returns true if any instance failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.instances.iter().any(|i| i.status == StepStatus::Failed)
    }

    /// Returns true if any instance is dispatched or processing.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.instances.iter().any(|i| i.status.is_in_flight())
    }

    /// A stable, directory-safe identifier incorporating service and
    /// program, used by `{{composite_name}}` path templates.
    #[must_use]
    pub fn composite_name(&self) -> String {
        let raw = format!(
            "{}_{}_{}",
            self.service, self.command_spec.program, self.name
        );
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Collapses the step back to a single pending instance, discarding
    /// any fan-out expansion. Used when a retry resets the step.
    pub fn collapse_instances(&mut self) {
        self.instances = vec![StepInstance::new(0)];
        self.expanded = false;
    }

    /// The per-instance output values of a fanned-out step, in index
    /// order, for one named output placeholder.
    #[must_use]
    pub fn instance_outputs(&self, placeholder: &str) -> Vec<serde_json::Value> {
        let mut sorted: Vec<&StepInstance> = self.instances.iter().collect();
        sorted.sort_by_key(|i| i.index);
        sorted
            .iter()
            .filter_map(|i| i.outputs.get(placeholder).cloned())
            .collect()
    }
}
