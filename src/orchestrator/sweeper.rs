//! The timeout sweeper.
//!
//! A dispatched or processing instance whose deadline has passed is
//! reaped: marked failed with an infrastructure error. A worker result
//! arriving afterwards is ignored because the instance is no longer in
//! flight.

use crate::config::EngineConfig;
use crate::core::{StepError, StepStatus};
use crate::dispatcher::Dispatcher;
use crate::events::{EngineEvent, EventSink};
use crate::store::JobStore;
use crate::utils::now_utc;
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

/// Background task reaping overdue step instances.
pub struct Sweeper {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl Sweeper {
    /// Starts the sweeper at `config.sweeper_interval`.
    #[must_use]
    pub fn start(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<Dispatcher>,
        sink: Arc<dyn EventSink>,
        config: EngineConfig,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.sweeper_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            while !stop.load(Ordering::SeqCst) {
                interval.tick().await;
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(err) = sweep_once(&store, &dispatcher, &sink).await {
                    error!(error = %err, "sweep pass failed");
                }
            }
        });

        Self { handle, shutdown }
    }

    /// Signals the sweeper to stop and waits for it.
    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.handle.abort();
        let _ = self.handle.await;
    }
}

/// Scans every active job once and reaps overdue instances.
pub async fn sweep_once(
    store: &Arc<dyn JobStore>,
    dispatcher: &Arc<Dispatcher>,
    sink: &Arc<dyn EventSink>,
) -> Result<(), crate::errors::WaveflowError> {
    for job_id in store.active_jobs().await? {
        let reaped = reap_overdue(store, job_id).await?;
        if reaped.is_empty() {
            continue;
        }
        for (step, index) in &reaped {
            warn!(job_id = %job_id, step = %step, instance = index, "step timed out, reaped");
            sink.emit(EngineEvent::StepTimedOut {
                job_id,
                step: step.clone(),
                instance: *index,
            });
        }
        dispatcher.drive(job_id).await?;
    }
    Ok(())
}

async fn reap_overdue(
    store: &Arc<dyn JobStore>,
    job_id: Uuid,
) -> Result<Vec<(String, u32)>, crate::errors::WaveflowError> {
    let reaped = Arc::new(SyncMutex::new(Vec::new()));
    let reaped_out = reaped.clone();

    store
        .mutate(
            job_id,
            Box::new(move |job| {
                let now = now_utc();
                for step in &mut job.steps {
                    for instance in &mut step.instances {
                        let overdue = matches!(
                            instance.status,
                            StepStatus::Dispatched | StepStatus::Processing
                        ) && instance.deadline.is_some_and(|d| d < now);
                        if overdue {
                            let timeout = instance
                                .deadline
                                .zip(instance.dispatched_at)
                                .map_or(0, |(d, s)| (d - s).num_seconds().max(0) as u64);
                            instance.mark_failed(StepError::timeout(timeout));
                            reaped_out.lock().push((step.name.clone(), instance.index));
                        }
                    }
                }
            }),
        )
        .await?;

    let result = reaped.lock().clone();
    Ok(result)
}
