//! Thin queue message shapes and queue naming.
//!
//! Messages never carry input data: workers hydrate full step context
//! through the orchestration API using the identifiers here. That keeps
//! the job store the single source of truth and lets parameter edits
//! propagate to retries.

use super::{Outcome, StepError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The queue the engine drains for worker outcome reports.
pub const STATUS_QUEUE: &str = "job_status_events";

/// Returns the dispatch queue name for a worker service.
#[must_use]
pub fn service_queue_name(service: &str) -> String {
    format!("{service}_queue")
}

/// Returns the bus counter key for a fan-in join.
#[must_use]
pub fn join_counter_key(job_id: Uuid, step_name: &str) -> String {
    format!("job:{job_id}:join:{step_name}")
}

/// The message written to a service queue when a step becomes ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDispatchMessage {
    /// The job to hydrate from.
    pub job_id: Uuid,
    /// The step to execute.
    pub step_name: String,
    /// Instance index for fanned-out steps; absent means instance 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_index: Option<u32>,
}

impl StepDispatchMessage {
    /// Creates a dispatch message.
    #[must_use]
    pub fn new(job_id: Uuid, step_name: impl Into<String>, instance_index: Option<u32>) -> Self {
        Self {
            job_id,
            step_name: step_name.into(),
            instance_index,
        }
    }

    /// The effective instance index (0 when absent).
    #[must_use]
    pub fn index(&self) -> u32 {
        self.instance_index.unwrap_or(0)
    }
}

/// The message a worker writes to the status queue when a step finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStatusMessage {
    /// The job the step belongs to.
    pub job_id: Uuid,
    /// The step that finished.
    pub step_name: String,
    /// Instance index for fanned-out steps; absent means instance 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_index: Option<u32>,
    /// Success or failure.
    pub outcome: Outcome,
    /// Produced outputs, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<BTreeMap<String, serde_json::Value>>,
    /// Content checksums of the produced outputs, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_checksums: Option<BTreeMap<String, String>>,
    /// Structured error, on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl StepStatusMessage {
    /// Creates a success report.
    #[must_use]
    pub fn complete(
        job_id: Uuid,
        step_name: impl Into<String>,
        instance_index: Option<u32>,
        outputs: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            job_id,
            step_name: step_name.into(),
            instance_index,
            outcome: Outcome::Complete,
            outputs: Some(outputs),
            output_checksums: None,
            error: None,
        }
    }

    /// Creates a failure report.
    #[must_use]
    pub fn failed(
        job_id: Uuid,
        step_name: impl Into<String>,
        instance_index: Option<u32>,
        error: StepError,
    ) -> Self {
        Self {
            job_id,
            step_name: step_name.into(),
            instance_index,
            outcome: Outcome::Failed,
            outputs: None,
            output_checksums: None,
            error: Some(error),
        }
    }

    /// Attaches output checksums to a success report.
    #[must_use]
    pub fn with_checksums(mut self, checksums: BTreeMap<String, String>) -> Self {
        self.output_checksums = Some(checksums);
        self
    }

    /// The effective instance index (0 when absent).
    #[must_use]
    pub fn index(&self) -> u32 {
        self.instance_index.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_queue_name() {
        assert_eq!(service_queue_name("flucoma_service"), "flucoma_service_queue");
    }

    #[test]
    fn test_join_counter_key() {
        let job_id = Uuid::nil();
        assert_eq!(
            join_counter_key(job_id, "aggregate"),
            format!("job:{job_id}:join:aggregate")
        );
    }

    #[test]
    fn test_dispatch_message_omits_absent_index() {
        let msg = StepDispatchMessage::new(Uuid::nil(), "normalize", None);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("instance_index"));
        assert_eq!(msg.index(), 0);
    }

    #[test]
    fn test_dispatch_message_round_trip() {
        let msg = StepDispatchMessage::new(Uuid::new_v4(), "analyze", Some(3));
        let json = serde_json::to_string(&msg).unwrap();
        let back: StepDispatchMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.index(), 3);
    }

    #[test]
    fn test_status_message_complete() {
        let msg = StepStatusMessage::complete(
            Uuid::nil(),
            "normalize",
            None,
            BTreeMap::from([("out".to_string(), serde_json::json!("out.wav"))]),
        )
        .with_checksums(BTreeMap::from([("out".to_string(), "abc123".to_string())]));

        assert_eq!(msg.outcome, Outcome::Complete);
        assert!(msg.error.is_none());
        assert!(msg.output_checksums.is_some());
    }

    #[test]
    fn test_status_message_failed() {
        let msg = StepStatusMessage::failed(
            Uuid::nil(),
            "normalize",
            Some(1),
            StepError::application("TOOL_EXIT_NONZERO", "exit 2"),
        );

        assert_eq!(msg.outcome, Outcome::Failed);
        assert!(msg.outputs.is_none());
        assert_eq!(msg.index(), 1);
    }
}
