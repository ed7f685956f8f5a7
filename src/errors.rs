//! Error types for the waveflow engine.
//!
//! Validation failures carry structured, coded diagnostics naming the
//! offending step and field; store, bus, cache, and template failures are
//! wrapped so callers can distinguish infrastructure trouble from bad
//! pipelines.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// The main error type for waveflow operations.
#[derive(Debug, Error)]
pub enum WaveflowError {
    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A job store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A queue bus operation failed.
    #[error("{0}")]
    Bus(#[from] BusError),

    /// A cache index operation failed.
    #[error("{0}")]
    Cache(#[from] CacheError),

    /// A template could not be resolved.
    #[error("{0}")]
    Template(#[from] TemplateError),

    /// The requested job does not exist.
    #[error("Job not found: {job_id}")]
    JobNotFound {
        /// The missing job id.
        job_id: Uuid,
    },

    /// The requested step does not exist within the job.
    #[error("Step '{step}' not found in job {job_id}")]
    StepNotFound {
        /// The job id.
        job_id: Uuid,
        /// The missing step name.
        step: String,
    },

    /// The requested step instance does not exist.
    #[error("Step '{step}' in job {job_id} has no instance {index}")]
    InstanceNotFound {
        /// The job id.
        job_id: Uuid,
        /// The step name.
        step: String,
        /// The missing instance index.
        index: u32,
    },

    /// A retry was requested for a job that cannot be retried.
    #[error("Job {job_id} cannot be retried: {reason}")]
    RetryNotAllowed {
        /// The job id.
        job_id: Uuid,
        /// Why the retry was refused.
        reason: String,
    },

    /// A persisted job document could not be interpreted.
    #[error("Corrupt job document {job_id}: {detail}")]
    CorruptDocument {
        /// The job id.
        job_id: Uuid,
        /// What failed to decode.
        detail: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for WaveflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Structured metadata attached to a validation error.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidationErrorInfo {
    /// Error code (e.g., "PIPELINE-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ValidationErrorInfo {
    /// Creates a new validation error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a submitted pipeline fails validation.
///
/// Validation is fatal: the job is never persisted.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The offending step, if the error is step-scoped.
    pub step: Option<String>,
    /// The offending field or placeholder, if any.
    pub field: Option<String>,
    /// Structured error info.
    pub error_info: Option<ValidationErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            step: None,
            field: None,
            error_info: None,
        }
    }

    /// Names the offending step.
    #[must_use]
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Names the offending field or placeholder.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Attaches structured error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ValidationErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Converts to a dictionary representation for API responses.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert(
            "message".to_string(),
            serde_json::Value::String(self.message.clone()),
        );
        if let Some(ref step) = self.step {
            map.insert("step".to_string(), serde_json::Value::String(step.clone()));
        }
        if let Some(ref field) = self.field {
            map.insert("field".to_string(), serde_json::Value::String(field.clone()));
        }
        if let Some(ref info) = self.error_info {
            map.insert(
                "error_info".to_string(),
                serde_json::to_value(info).unwrap_or(serde_json::Value::Null),
            );
        }
        map
    }
}

/// Errors from the job store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The job document does not exist.
    #[error("Job document not found: {job_id}")]
    NotFound {
        /// The missing job id.
        job_id: Uuid,
    },

    /// A compare-and-set lost the race.
    #[error("Compare-and-set conflict on job {job_id}")]
    CasConflict {
        /// The contested job id.
        job_id: Uuid,
    },

    /// The backing store misbehaved.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Errors from the queue bus.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The queue has been closed for writes.
    #[error("Queue closed: {queue}")]
    QueueClosed {
        /// The closed queue name.
        queue: String,
    },

    /// The backing bus misbehaved.
    #[error("Bus backend error: {0}")]
    Backend(String),
}

/// Errors from the cache index.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The backing cache misbehaved.
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Errors raised while resolving placeholder templates.
#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    /// A `{{steps.<name>...}}` reference names an unknown step.
    #[error("Template references unknown step '{step}'")]
    UnknownStep {
        /// The referenced step name.
        step: String,
    },

    /// A `{{steps.<name>.outputs.<key>}}` reference names an unknown output.
    #[error("Step '{step}' has no output '{output}'")]
    UnknownOutput {
        /// The referenced step name.
        step: String,
        /// The referenced output key.
        output: String,
    },

    /// A placeholder had no binding in the current job state.
    #[error("Unresolved placeholder '{placeholder}'")]
    Unresolved {
        /// The placeholder name.
        placeholder: String,
    },

    /// The template text itself is malformed.
    #[error("Malformed template: {template}")]
    Malformed {
        /// The offending template text.
        template: String,
    },
}

/// Default fix suggestions for common validation error codes.
pub struct ValidationSuggestions;

impl ValidationSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "PIPELINE-001-SERVICE" => Some(
                "Check the service name against the registered manifests. \
                 Service names are case-sensitive.",
            ),
            "PIPELINE-002-PARAM" => Some(
                "Compare the parameter against the operation's descriptor: \
                 type, range, and allowed choices must all match.",
            ),
            "PIPELINE-003-EDGE" => Some(
                "Transitions must name existing steps, and the producer must \
                 be declared before the consumer.",
            ),
            "PIPELINE-004-CYCLE" => Some(
                "Check your transitions for circular references. \
                 Use a linear chain or fan-out pattern instead.",
            ),
            "PIPELINE-005-BINDING" => Some(
                "Every declared input needs exactly one source: either a \
                 literal in the step's inputs or one incoming transition.",
            ),
            "PIPELINE-006-OUTPUT" => Some(
                "Output placeholders must be unique within a step and match \
                 the operation's declared outputs.",
            ),
            _ => None,
        }
    }
}
