//! A scripted worker for exercising the engine end to end.

use crate::bus::QueueBus;
use crate::core::{
    service_queue_name, StepDispatchMessage, StepError, StepStatusMessage, STATUS_QUEUE,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// What the mock worker does with a step it pops.
#[derive(Debug, Clone)]
pub enum WorkerBehavior {
    /// Report success with these outputs. String values may contain
    /// `{index}`, replaced with the instance index.
    Succeed(BTreeMap<String, serde_json::Value>),
    /// Report success with outputs and content checksums.
    SucceedWithChecksums(BTreeMap<String, serde_json::Value>, BTreeMap<String, String>),
    /// Report failure with this error.
    Fail(StepError),
    /// Pop the message but never report (for timeout tests).
    Hang,
}

/// A worker that drains one service queue and reports outcomes on the
/// status queue, like a real worker wrapper would.
pub struct MockWorker {
    bus: Arc<dyn QueueBus>,
    service: String,
    behaviors: Mutex<HashMap<String, WorkerBehavior>>,
    processed: Mutex<Vec<StepDispatchMessage>>,
}

impl MockWorker {
    /// Creates a worker for one service.
    #[must_use]
    pub fn new(bus: Arc<dyn QueueBus>, service: impl Into<String>) -> Self {
        Self {
            bus,
            service: service.into(),
            behaviors: Mutex::new(HashMap::new()),
            processed: Mutex::new(Vec::new()),
        }
    }

    /// Scripts the behavior for a step name.
    pub fn on(&self, step: impl Into<String>, behavior: WorkerBehavior) {
        self.behaviors.lock().insert(step.into(), behavior);
    }

    /// Returns every dispatch message the worker has popped.
    #[must_use]
    pub fn processed(&self) -> Vec<StepDispatchMessage> {
        self.processed.lock().clone()
    }

    /// Pops up to `max` messages, reporting each according to its
    /// scripted behavior. Returns the number of messages handled.
    pub async fn drain(&self, max: usize, timeout: Duration) -> usize {
        let queue = service_queue_name(&self.service);
        let mut handled = 0;

        for _ in 0..max {
            let Ok(Some(payload)) = self.bus.pop(&queue, timeout).await else {
                break;
            };
            let Ok(message) = serde_json::from_str::<StepDispatchMessage>(&payload) else {
                continue;
            };
            self.processed.lock().push(message.clone());
            handled += 1;

            let behavior = self.behaviors.lock().get(&message.step_name).cloned();
            let reply = match behavior {
                Some(WorkerBehavior::Succeed(outputs)) => StepStatusMessage::complete(
                    message.job_id,
                    message.step_name.clone(),
                    message.instance_index,
                    substitute_index(outputs, message.index()),
                ),
                Some(WorkerBehavior::SucceedWithChecksums(outputs, checksums)) => {
                    StepStatusMessage::complete(
                        message.job_id,
                        message.step_name.clone(),
                        message.instance_index,
                        substitute_index(outputs, message.index()),
                    )
                    .with_checksums(checksums)
                }
                Some(WorkerBehavior::Fail(error)) => StepStatusMessage::failed(
                    message.job_id,
                    message.step_name.clone(),
                    message.instance_index,
                    error,
                ),
                Some(WorkerBehavior::Hang) => continue,
                None => StepStatusMessage::failed(
                    message.job_id,
                    message.step_name.clone(),
                    message.instance_index,
                    StepError::application("UNSCRIPTED", "no behavior scripted for step"),
                ),
            };

            let payload = serde_json::to_string(&reply).expect("status message serializes");
            self.bus
                .push(STATUS_QUEUE, payload)
                .await
                .expect("status push succeeds");
        }
        handled
    }
}

fn substitute_index(
    outputs: BTreeMap<String, serde_json::Value>,
    index: u32,
) -> BTreeMap<String, serde_json::Value> {
    outputs
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => {
                    serde_json::Value::String(s.replace("{index}", &index.to_string()))
                }
                other => other,
            };
            (k, v)
        })
        .collect()
}
