//! Engine events and the sinks that receive them.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// A structured orchestration event.
///
/// Every event names the job it belongs to; step-scoped events carry the
/// step name and instance index. The `kind` discriminant follows a
/// `<subject>.<verb>` convention on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EngineEvent {
    /// A pipeline was validated and persisted.
    #[serde(rename = "job.created")]
    JobCreated {
        /// The new job.
        job_id: Uuid,
    },
    /// Every step finished successfully.
    #[serde(rename = "job.completed")]
    JobCompleted {
        /// The finished job.
        job_id: Uuid,
        /// Which retry generation completed.
        retry_generation: u32,
    },
    /// The job reached `failed` after in-flight work drained.
    #[serde(rename = "job.failed")]
    JobFailed {
        /// The failed job.
        job_id: Uuid,
        /// Which retry generation failed.
        retry_generation: u32,
    },
    /// A retry was accepted and the reset set re-entered the planner.
    #[serde(rename = "job.retrying")]
    JobRetrying {
        /// The retried job.
        job_id: Uuid,
        /// The earliest failed step execution resumes from.
        resume_step: String,
    },
    /// A dispatch message was written to a service queue.
    #[serde(rename = "step.dispatched")]
    StepDispatched {
        /// The owning job.
        job_id: Uuid,
        /// The dispatched step.
        step: String,
        /// The dispatched instance.
        instance: u32,
        /// The service queue the message went to.
        queue: String,
    },
    /// A worker reported success for an instance.
    #[serde(rename = "step.completed")]
    StepCompleted {
        /// The owning job.
        job_id: Uuid,
        /// The completed step.
        step: String,
        /// The completed instance.
        instance: u32,
    },
    /// A worker reported failure for an instance.
    #[serde(rename = "step.failed")]
    StepFailed {
        /// The owning job.
        job_id: Uuid,
        /// The failed step.
        step: String,
        /// The failed instance.
        instance: u32,
        /// The worker's error code, when one was supplied.
        error_code: Option<String>,
    },
    /// A deterministic step was satisfied from the cache index.
    #[serde(rename = "step.cache_hit")]
    StepCacheHit {
        /// The owning job.
        job_id: Uuid,
        /// The skipped step.
        step: String,
        /// The cache key that hit.
        cache_key: String,
    },
    /// The sweeper reaped an instance past its deadline.
    #[serde(rename = "step.timed_out")]
    StepTimedOut {
        /// The owning job.
        job_id: Uuid,
        /// The reaped step.
        step: String,
        /// The reaped instance.
        instance: u32,
    },
    /// A declared step was materialised as parallel instances.
    #[serde(rename = "step.fanned_out")]
    StepFannedOut {
        /// The owning job.
        job_id: Uuid,
        /// The expanded step.
        step: String,
        /// How many instances were materialised.
        instances: u32,
    },
    /// A fan-in counter reached zero and the join became eligible.
    #[serde(rename = "join.satisfied")]
    JoinSatisfied {
        /// The owning job.
        job_id: Uuid,
        /// The join step.
        join: String,
    },
}

impl EngineEvent {
    /// The wire discriminant, e.g. `"step.dispatched"`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => "job.created",
            Self::JobCompleted { .. } => "job.completed",
            Self::JobFailed { .. } => "job.failed",
            Self::JobRetrying { .. } => "job.retrying",
            Self::StepDispatched { .. } => "step.dispatched",
            Self::StepCompleted { .. } => "step.completed",
            Self::StepFailed { .. } => "step.failed",
            Self::StepCacheHit { .. } => "step.cache_hit",
            Self::StepTimedOut { .. } => "step.timed_out",
            Self::StepFannedOut { .. } => "step.fanned_out",
            Self::JoinSatisfied { .. } => "join.satisfied",
        }
    }

    /// The job the event belongs to.
    #[must_use]
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::JobCreated { job_id }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobRetrying { job_id, .. }
            | Self::StepDispatched { job_id, .. }
            | Self::StepCompleted { job_id, .. }
            | Self::StepFailed { job_id, .. }
            | Self::StepCacheHit { job_id, .. }
            | Self::StepTimedOut { job_id, .. }
            | Self::StepFannedOut { job_id, .. }
            | Self::JoinSatisfied { job_id, .. } => *job_id,
        }
    }
}

/// Receives engine events.
///
/// Emission sits on the orchestration path, so sinks must not block;
/// an implementation that ships events somewhere slow buffers them
/// itself.
pub trait EventSink: Send + Sync {
    /// Delivers one event.
    fn emit(&self, event: EngineEvent);
}

/// A sink that discards all events.
///
/// Used when the host wires no observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// A sink that logs each event through `tracing` with structured
/// fields.
///
/// Failures and timeouts log at warn, everything else at info.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl TracingEventSink {
    /// Creates a tracing sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for TracingEventSink {
    fn emit(&self, event: EngineEvent) {
        match &event {
            EngineEvent::JobCreated { job_id } => {
                info!(%job_id, "job created");
            }
            EngineEvent::JobCompleted { job_id, retry_generation } => {
                info!(%job_id, retry_generation, "job completed");
            }
            EngineEvent::JobFailed { job_id, retry_generation } => {
                warn!(%job_id, retry_generation, "job failed");
            }
            EngineEvent::JobRetrying { job_id, resume_step } => {
                info!(%job_id, %resume_step, "job retrying");
            }
            EngineEvent::StepDispatched { job_id, step, instance, queue } => {
                info!(%job_id, %step, instance, %queue, "step dispatched");
            }
            EngineEvent::StepCompleted { job_id, step, instance } => {
                info!(%job_id, %step, instance, "step completed");
            }
            EngineEvent::StepFailed { job_id, step, instance, error_code } => {
                warn!(%job_id, %step, instance, ?error_code, "step failed");
            }
            EngineEvent::StepCacheHit { job_id, step, cache_key } => {
                info!(%job_id, %step, %cache_key, "step served from cache");
            }
            EngineEvent::StepTimedOut { job_id, step, instance } => {
                warn!(%job_id, %step, instance, "step timed out");
            }
            EngineEvent::StepFannedOut { job_id, step, instances } => {
                info!(%job_id, %step, instances, "step fanned out");
            }
            EngineEvent::JoinSatisfied { job_id, join } => {
                info!(%job_id, %join, "join satisfied");
            }
        }
    }
}

/// A sink that records events for test assertions.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<EngineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.read().clone()
    }

    /// Returns the events with the given kind.
    #[must_use]
    pub fn of_kind(&self, kind: &str) -> Vec<EngineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }

    /// Returns the events belonging to one job.
    #[must_use]
    pub fn for_job(&self, job_id: Uuid) -> Vec<EngineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.job_id() == job_id)
            .cloned()
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: EngineEvent) {
        self.events.write().push(event);
    }
}
