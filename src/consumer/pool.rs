//! The status-consumer pool.

use super::{ApplyOutcome, StatusApplier};
use crate::bus::QueueBus;
use crate::config::EngineConfig;
use crate::core::StepStatusMessage;
use crate::dispatcher::Dispatcher;
use crate::utils::retry_with_backoff;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A pool of tasks draining the status queue concurrently.
///
/// Each worker loops on the blocking pop, applies the outcome with
/// bounded backoff, and re-drives the planner for the affected job.
/// A message whose apply exhausts its retries is returned to the queue
/// for redelivery.
pub struct StatusConsumerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl StatusConsumerPool {
    /// Starts `config.consumer_pool_size` consumer tasks.
    #[must_use]
    pub fn start(
        applier: Arc<StatusApplier>,
        dispatcher: Arc<Dispatcher>,
        bus: Arc<dyn QueueBus>,
        config: EngineConfig,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(config.consumer_pool_size);

        for worker in 0..config.consumer_pool_size {
            let applier = applier.clone();
            let dispatcher = dispatcher.clone();
            let bus = bus.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                info!(worker, queue = %config.status_queue, "status consumer started");
                while !shutdown.load(Ordering::SeqCst) {
                    let popped = match bus.pop(&config.status_queue, config.poll_timeout).await {
                        Ok(popped) => popped,
                        Err(err) => {
                            warn!(worker, error = %err, "status queue pop failed");
                            tokio::time::sleep(config.apply_backoff_base).await;
                            continue;
                        }
                    };
                    let Some(payload) = popped else {
                        continue;
                    };
                    handle_payload(&applier, &dispatcher, &bus, &config, worker, payload).await;
                }
                info!(worker, "status consumer stopped");
            }));
        }

        Self { handles, shutdown }
    }

    /// Signals every worker to stop and waits for them to finish.
    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn handle_payload(
    applier: &StatusApplier,
    dispatcher: &Dispatcher,
    bus: &Arc<dyn QueueBus>,
    config: &EngineConfig,
    worker: usize,
    payload: String,
) {
    let message: StepStatusMessage = match serde_json::from_str(&payload) {
        Ok(message) => message,
        Err(err) => {
            // Undecodable messages cannot be retried; drop them loudly.
            error!(worker, error = %err, "invalid status message dropped");
            return;
        }
    };

    let applied = retry_with_backoff(
        config.apply_retry_attempts,
        config.apply_backoff_base,
        || applier.apply(&message),
    )
    .await;

    match applied {
        Ok(ApplyOutcome::Applied) => {
            if let Err(err) = dispatcher.drive(message.job_id).await {
                error!(
                    worker,
                    job_id = %message.job_id,
                    error = %err,
                    "planner drive failed after status apply"
                );
            }
        }
        Ok(ApplyOutcome::Stale | ApplyOutcome::Unknown) => {}
        Err(err) => {
            // Apply retries exhausted: put the message back for
            // redelivery rather than losing the outcome.
            warn!(
                worker,
                job_id = %message.job_id,
                step = %message.step_name,
                error = %err,
                "status apply exhausted retries, requeueing"
            );
            if let Err(push_err) = bus.push(&config.status_queue, payload).await {
                error!(worker, error = %push_err, "requeue failed, status message lost");
            }
        }
    }
}
