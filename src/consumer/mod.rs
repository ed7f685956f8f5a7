//! Status consumption: applying worker outcome reports to job documents.
//!
//! Outcome application is idempotent: a terminal instance is never
//! overwritten, so duplicate deliveries and late results for reaped
//! steps are harmless no-ops. Join counters are decremented here; the
//! decrement-and-get is the happens-before edge for join readiness.

mod pool;

pub use pool::StatusConsumerPool;

use crate::bus::QueueBus;
use crate::cache::{CacheEntry, CacheIndex};
use crate::config::EngineConfig;
use crate::core::{join_counter_key, Outcome, StepError, StepStatus, StepStatusMessage};
use crate::errors::WaveflowError;
use crate::events::{EngineEvent, EventSink};
use crate::manifest::ManifestRegistry;
use crate::store::JobStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// What applying one status message did to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The instance transitioned; the planner should run.
    Applied,
    /// The instance was already terminal (duplicate or late delivery).
    Stale,
    /// The job or the named step/instance does not exist.
    Unknown,
}

/// Applies worker outcome reports to job documents.
pub struct StatusApplier {
    store: Arc<dyn JobStore>,
    bus: Arc<dyn QueueBus>,
    cache: Arc<dyn CacheIndex>,
    registry: Arc<ManifestRegistry>,
    sink: Arc<dyn EventSink>,
    config: EngineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Missing,
    Stale,
    Completed,
    Failed,
}

impl StatusApplier {
    /// Creates an applier over the shared collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        bus: Arc<dyn QueueBus>,
        cache: Arc<dyn CacheIndex>,
        registry: Arc<ManifestRegistry>,
        sink: Arc<dyn EventSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            bus,
            cache,
            registry,
            sink,
            config,
        }
    }

    /// Applies one status message.
    ///
    /// On completion: records outputs and checksums, writes a cache entry
    /// for deterministic operations, and decrements the join counters of
    /// every consumer downstream of a fanned-out producer. On failure:
    /// records the structured error. Either way the caller should then
    /// re-drive the planner.
    pub async fn apply(&self, message: &StepStatusMessage) -> Result<ApplyOutcome, WaveflowError> {
        let job_id = message.job_id;
        if self.store.get(job_id).await?.is_none() {
            warn!(job_id = %job_id, step = %message.step_name, "status for unknown job dropped");
            return Ok(ApplyOutcome::Unknown);
        }

        let disposition = Arc::new(Mutex::new(Disposition::Missing));
        let updated = {
            let disposition = disposition.clone();
            let message = message.clone();
            self.store
                .mutate(
                    job_id,
                    Box::new(move |job| {
                        let Some(step) = job.step_mut(&message.step_name) else {
                            return;
                        };
                        let Some(instance) = step.instance_mut(message.index()) else {
                            return;
                        };
                        if !matches!(
                            instance.status,
                            StepStatus::Dispatched | StepStatus::Processing
                        ) {
                            *disposition.lock() = Disposition::Stale;
                            return;
                        }
                        match message.outcome {
                            Outcome::Complete => {
                                instance.mark_complete(
                                    message.outputs.clone().unwrap_or_default(),
                                    message.output_checksums.clone().unwrap_or_default(),
                                );
                                *disposition.lock() = Disposition::Completed;
                            }
                            Outcome::Failed => {
                                let error = message.error.clone().unwrap_or_else(|| {
                                    StepError::application(
                                        "UNSPECIFIED",
                                        "worker reported failure without an error object",
                                    )
                                });
                                instance.mark_failed(error);
                                *disposition.lock() = Disposition::Failed;
                            }
                        }
                    }),
                )
                .await?
        };

        let disposition = *disposition.lock();
        match disposition {
            Disposition::Missing => {
                warn!(
                    job_id = %job_id,
                    step = %message.step_name,
                    instance = message.index(),
                    "status for unknown step or instance dropped"
                );
                Ok(ApplyOutcome::Unknown)
            }
            Disposition::Stale => {
                info!(
                    job_id = %job_id,
                    step = %message.step_name,
                    instance = message.index(),
                    "stale status ignored"
                );
                Ok(ApplyOutcome::Stale)
            }
            Disposition::Completed => {
                self.record_cache_entry(&updated, message).await?;
                self.decrement_joins(&updated, message).await?;
                self.sink.emit(EngineEvent::StepCompleted {
                    job_id,
                    step: message.step_name.clone(),
                    instance: message.index(),
                });
                Ok(ApplyOutcome::Applied)
            }
            Disposition::Failed => {
                self.sink.emit(EngineEvent::StepFailed {
                    job_id,
                    step: message.step_name.clone(),
                    instance: message.index(),
                    error_code: message.error.as_ref().map(|e| e.error_code.clone()),
                });
                Ok(ApplyOutcome::Applied)
            }
        }
    }

    /// Writes the cache entry for a completed deterministic instance.
    async fn record_cache_entry(
        &self,
        job: &crate::core::Job,
        message: &StepStatusMessage,
    ) -> Result<(), WaveflowError> {
        let Some(step) = job.step(&message.step_name) else {
            return Ok(());
        };
        let Some(instance) = step.instance(message.index()) else {
            return Ok(());
        };
        let Some(ref key) = instance.cache_key else {
            return Ok(());
        };

        let ttl = self
            .registry
            .get(&step.service)
            .and_then(|m| m.operation(&step.operation).and_then(|op| op.cache_ttl_secs))
            .unwrap_or(self.config.default_cache_ttl_secs);

        self.cache
            .put(key, CacheEntry::new(instance.outputs.clone(), ttl))
            .await?;
        Ok(())
    }

    /// Decrements the join counter of every consumer downstream of a
    /// fanned-out producer instance that just completed.
    async fn decrement_joins(
        &self,
        job: &crate::core::Job,
        message: &StepStatusMessage,
    ) -> Result<(), WaveflowError> {
        let Some(step) = job.step(&message.step_name) else {
            return Ok(());
        };
        if !step.expanded {
            return Ok(());
        }
        for transition in job.transitions_out_of(&step.name) {
            let key = join_counter_key(job.job_id, &transition.to);
            let remaining = self.bus.counter_decrement(&key).await?;
            if remaining == 0 {
                self.sink.emit(EngineEvent::JoinSatisfied {
                    job_id: job.job_id,
                    join: transition.to.clone(),
                });
            }
        }
        Ok(())
    }
}
