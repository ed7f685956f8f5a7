//! The structured error object attached to failed steps.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known error codes used by the engine itself.
pub mod codes {
    /// A dispatched step exceeded its timeout and was reaped.
    pub const STEP_TIMEOUT: &str = "STEP_TIMEOUT";
    /// A persisted job document could not be decoded.
    pub const CORRUPT_JOB_DOCUMENT: &str = "CORRUPT_JOB_DOCUMENT";
}

/// The broad classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// Surfaced from worker logic: bad input file, parameter violating
    /// the manifest, tool exited non-zero. Retryable only via explicit
    /// user action.
    ApplicationError,
    /// Surfaced from the environment: queue unreachable, store
    /// unreachable, timeout.
    InfrastructureError,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApplicationError => write!(f, "APPLICATION_ERROR"),
            Self::InfrastructureError => write!(f, "INFRASTRUCTURE_ERROR"),
        }
    }
}

/// A structured error recorded on a failed step and surfaced in the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    /// Application vs infrastructure classification.
    pub error_type: ErrorType,
    /// Machine-readable code (e.g. "STEP_TIMEOUT", "TOOL_EXIT_NONZERO").
    pub error_code: String,
    /// Human-readable description.
    pub error_message: String,
    /// Optional structured detail payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StepError {
    /// Creates an application error.
    #[must_use]
    pub fn application(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::ApplicationError,
            error_code: code.into(),
            error_message: message.into(),
            details: None,
        }
    }

    /// Creates an infrastructure error.
    #[must_use]
    pub fn infrastructure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::InfrastructureError,
            error_code: code.into(),
            error_message: message.into(),
            details: None,
        }
    }

    /// Attaches a structured detail payload.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The error recorded when the sweeper reaps an overdue step.
    #[must_use]
    pub fn timeout(timeout_secs: u64) -> Self {
        Self::infrastructure(
            codes::STEP_TIMEOUT,
            format!("Step exceeded its {timeout_secs}s timeout and was reaped"),
        )
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {}",
            self.error_type, self.error_code, self.error_message
        )
    }
}
