//! Job and step status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The overall execution status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job has been persisted but nothing has been dispatched yet.
    Pending,
    /// At least one step has been dispatched.
    Processing,
    /// Every step finished successfully.
    Complete,
    /// At least one step failed and no work remains in flight.
    Failed,
    /// A retry has been requested and the resume set is being reset.
    Retrying,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
        }
    }
}

impl JobStatus {
    /// Returns true if the job has reached a terminal state.
    ///
    /// `failed` is terminal until explicitly retried; `complete` is
    /// terminal forever.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// The execution status of a single step instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for its inputs to be bound.
    Pending,
    /// All inputs bound; eligible for dispatch.
    Ready,
    /// A dispatch message has been written to the service queue.
    Dispatched,
    /// A worker has picked the step up and reported progress.
    Processing,
    /// The worker reported success.
    Complete,
    /// The worker reported failure, or the step timed out.
    Failed,
    /// Satisfied from the cache index without dispatching.
    #[serde(rename = "skipped-cached")]
    SkippedCached,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::Processing => write!(f, "processing"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
            Self::SkippedCached => write!(f, "skipped-cached"),
        }
    }
}

impl StepStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::SkippedCached)
    }

    /// Returns true if the status indicates success.
    ///
    /// A cache hit counts as success for readiness of downstream steps.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Complete | Self::SkippedCached)
    }

    /// Returns true if a worker currently owns the step.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Dispatched | Self::Processing)
    }
}

/// The outcome a worker reports on the status queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The step finished and produced its outputs.
    Complete,
    /// The step failed; a structured error accompanies the message.
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
