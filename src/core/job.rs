//! The durable job document.

use super::{JobStatus, Step, StepStatus, Transition};
use crate::utils::{generate_uuid, now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The persisted job document: immutable identity plus mutable state.
///
/// The document is the single source of truth for pipeline state; queue
/// messages only carry identifiers pointing back into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub job_id: Uuid,
    /// Owner of the job; substituted into `{{user_id}}` templates.
    pub user_id: String,
    /// Overall status.
    #[serde(default)]
    pub status: JobStatus,
    /// Ordered steps.
    pub steps: Vec<Step>,
    /// Ordered data-routing edges.
    #[serde(rename = "step_transitions", default)]
    pub transitions: Vec<Transition>,
    /// When the job was created.
    pub created_at: Timestamp,
    /// When the document was last mutated.
    pub updated_at: Timestamp,
    /// Declared index of the step a retry resumed from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_cursor: Option<usize>,
    /// Incremented on every retry; guards at-most-once terminal
    /// transitions per generation.
    #[serde(default)]
    pub retry_generation: u32,
}

impl Job {
    /// Creates a new pending job.
    #[must_use]
    pub fn new(user_id: impl Into<String>, steps: Vec<Step>, transitions: Vec<Transition>) -> Self {
        let now = now_utc();
        Self {
            job_id: generate_uuid(),
            user_id: user_id.into(),
            status: JobStatus::Pending,
            steps,
            transitions,
            created_at: now,
            updated_at: now,
            resume_cursor: None,
            retry_generation: 0,
        }
    }

    /// Returns true if the job is pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }

    /// Returns true if the job is processing.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.status == JobStatus::Processing
    }

    /// Returns true if the job completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == JobStatus::Complete
    }

    /// Returns true if the job failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    /// Looks up a step by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Looks up a step by name, mutably.
    pub fn step_mut(&mut self, name: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.name == name)
    }

    /// Returns the declared position of a step.
    #[must_use]
    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// Returns the first step that has not finished successfully.
    #[must_use]
    pub fn first_unfinished_step(&self) -> Option<&Step> {
        self.steps.iter().find(|s| !s.is_complete())
    }

    /// All transitions feeding the named consumer step.
    #[must_use]
    pub fn transitions_into(&self, step_name: &str) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| t.to == step_name)
            .collect()
    }

    /// All transitions leaving the named producer step.
    #[must_use]
    pub fn transitions_out_of(&self, step_name: &str) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| t.from == step_name)
            .collect()
    }

    /// Derives the overall status the document should carry.
    ///
    /// Complete iff every step succeeded; failed iff some step failed and
    /// nothing is still in flight (in-flight siblings are allowed to
    /// drain first); otherwise the current status stands.
    #[must_use]
    pub fn derived_status(&self) -> JobStatus {
        if self.steps.iter().all(Step::is_complete) {
            return JobStatus::Complete;
        }
        let any_failed = self.steps.iter().any(Step::is_failed);
        let any_in_flight = self.steps.iter().any(Step::is_in_flight);
        if any_failed && !any_in_flight {
            return JobStatus::Failed;
        }
        self.status
    }

    /// Returns true if any step instance is dispatched or processing.
    #[must_use]
    pub fn has_in_flight_work(&self) -> bool {
        self.steps.iter().any(Step::is_in_flight)
    }

    /// Counts step instances currently in a given status.
    #[must_use]
    pub fn count_instances_in(&self, status: StepStatus) -> usize {
        self.steps
            .iter()
            .flat_map(|s| s.instances.iter())
            .filter(|i| i.status == status)
            .count()
    }

    /// Bumps the updated-at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = now_utc();
    }
}
