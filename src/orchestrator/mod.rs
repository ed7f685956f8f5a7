//! The orchestration API and engine wiring.
//!
//! `Orchestrator` is the external surface: submit, get, retry, and the
//! worker-facing hydrate. It owns the shared collaborators (store, bus,
//! cache index, manifest registry, event sink) and the two background
//! pieces - the status-consumer pool and the timeout sweeper - started
//! with [`Orchestrator::start`] and stopped with
//! [`Orchestrator::shutdown`].

mod sweeper;


pub use sweeper::Sweeper;

use crate::bus::{MemoryQueueBus, QueueBus};
use crate::cache::{CacheIndex, MemoryCacheIndex};
use crate::config::EngineConfig;
use crate::consumer::{ApplyOutcome, StatusApplier, StatusConsumerPool};
use crate::core::{
    join_counter_key, CommandSpec, Job, JobStatus, StepStatus, StepStatusMessage, Transition,
};
use crate::dispatcher::Dispatcher;
use crate::errors::WaveflowError;
use crate::events::{EngineEvent, EventSink, NoOpEventSink};
use crate::manifest::ManifestRegistry;
use crate::retry::{apply_retry_plan, compute_retry_plan};
use crate::store::{JobStore, MemoryJobStore};
use crate::template::{resolve_command_spec, resolve_outputs, resolve_template};
use crate::validator::{normalize_steps, validate_pipeline};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// A submitted pipeline: the owner plus declared steps and transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Owner of the job.
    pub user_id: String,
    /// Declared steps, in execution-preference order.
    pub steps: Vec<crate::core::Step>,
    /// Data-routing edges.
    #[serde(rename = "step_transitions", default)]
    pub transitions: Vec<Transition>,
}

/// The fully bound step context returned to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydratedStep {
    /// Command with input/output placeholders substituted.
    pub command_spec: CommandSpec,
    /// Input placeholder -> bound value.
    pub resolved_inputs: BTreeMap<String, serde_json::Value>,
    /// Output placeholder -> resolved destination.
    pub outputs: BTreeMap<String, String>,
    /// Operation parameters with templates substituted.
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// The response to a retry request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryReceipt {
    /// Always `retrying`.
    pub status: JobStatus,
    /// The step execution resumes from.
    pub resume_step: String,
}

/// The job orchestration engine.
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    bus: Arc<dyn QueueBus>,
    cache: Arc<dyn CacheIndex>,
    registry: Arc<ManifestRegistry>,
    sink: Arc<dyn EventSink>,
    config: EngineConfig,
    dispatcher: Arc<Dispatcher>,
    applier: Arc<StatusApplier>,
    pool: Mutex<Option<StatusConsumerPool>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Orchestrator {
    /// Creates an orchestrator over explicit collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        bus: Arc<dyn QueueBus>,
        cache: Arc<dyn CacheIndex>,
        registry: Arc<ManifestRegistry>,
        sink: Arc<dyn EventSink>,
        config: EngineConfig,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            bus.clone(),
            cache.clone(),
            registry.clone(),
            sink.clone(),
            config.clone(),
        ));
        let applier = Arc::new(StatusApplier::new(
            store.clone(),
            bus.clone(),
            cache.clone(),
            registry.clone(),
            sink.clone(),
            config.clone(),
        ));
        Self {
            store,
            bus,
            cache,
            registry,
            sink,
            config,
            dispatcher,
            applier,
            pool: Mutex::new(None),
            sweeper: Mutex::new(None),
        }
    }

    /// Creates an orchestrator over in-memory backends, suitable for
    /// tests and single-process deployments.
    #[must_use]
    pub fn in_memory(registry: Arc<ManifestRegistry>, config: EngineConfig) -> Self {
        Self::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryQueueBus::new()),
            Arc::new(MemoryCacheIndex::new()),
            registry,
            Arc::new(NoOpEventSink),
            config,
        )
    }

    /// Replaces the event sink (builder-style, before `start`).
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink.clone();
        self.dispatcher = Arc::new(Dispatcher::new(
            self.store.clone(),
            self.bus.clone(),
            self.cache.clone(),
            self.registry.clone(),
            sink.clone(),
            self.config.clone(),
        ));
        self.applier = Arc::new(StatusApplier::new(
            self.store.clone(),
            self.bus.clone(),
            self.cache.clone(),
            self.registry.clone(),
            sink,
            self.config.clone(),
        ));
        self
    }

    /// The queue bus, for wiring workers in tests and embedded setups.
    #[must_use]
    pub fn bus(&self) -> Arc<dyn QueueBus> {
        self.bus.clone()
    }

    /// Starts the status-consumer pool and the timeout sweeper.
    pub fn start(&self) {
        let mut pool = self.pool.lock();
        if pool.is_none() {
            *pool = Some(StatusConsumerPool::start(
                self.applier.clone(),
                self.dispatcher.clone(),
                self.bus.clone(),
                self.config.clone(),
            ));
        }
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_none() {
            *sweeper = Some(Sweeper::start(
                self.store.clone(),
                self.dispatcher.clone(),
                self.sink.clone(),
                self.config.clone(),
            ));
        }
    }

    /// Stops the background tasks and waits for them.
    pub async fn shutdown(&self) {
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.shutdown().await;
        }
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
    }

    /// Validates and persists a pipeline, dispatches whatever is
    /// immediately ready, and returns the new job id.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Uuid, WaveflowError> {
        validate_pipeline(&request.steps, &request.transitions, &self.registry)?;
        let steps = normalize_steps(request.steps);
        let job = Job::new(request.user_id, steps, request.transitions);
        let job_id = job.job_id;
        self.store.insert(job).await?;

        info!(job_id = %job_id, "job created");
        self.sink.emit(EngineEvent::JobCreated { job_id });

        self.dispatcher.drive(job_id).await?;
        Ok(job_id)
    }

    /// Fetches a read-only snapshot of the job document.
    pub async fn get(&self, job_id: Uuid) -> Result<Job, WaveflowError> {
        self.store
            .get(job_id)
            .await?
            .ok_or(WaveflowError::JobNotFound { job_id })
    }

    /// Begins a retry of a failed job from its earliest failed step.
    pub async fn retry(&self, job_id: Uuid) -> Result<RetryReceipt, WaveflowError> {
        let job = self.get(job_id).await?;
        match job.status {
            JobStatus::Failed => {}
            JobStatus::Complete => {
                return Err(WaveflowError::RetryNotAllowed {
                    job_id,
                    reason: "job is already complete".to_string(),
                })
            }
            JobStatus::Processing | JobStatus::Retrying => {
                return Err(WaveflowError::RetryNotAllowed {
                    job_id,
                    reason: "job is currently processing".to_string(),
                })
            }
            JobStatus::Pending => {
                return Err(WaveflowError::RetryNotAllowed {
                    job_id,
                    reason: "job has not run yet".to_string(),
                })
            }
        }

        let plan = compute_retry_plan(&job).ok_or(WaveflowError::RetryNotAllowed {
            job_id,
            reason: "no failed step to resume from".to_string(),
        })?;

        // Stale join counters from the failed run must not gate the rerun.
        for name in &plan.reset_steps {
            self.bus
                .counter_delete(&join_counter_key(job_id, name))
                .await?;
        }

        let plan_for_store = plan.clone();
        self.store
            .mutate(
                job_id,
                Box::new(move |job| apply_retry_plan(job, &plan_for_store)),
            )
            .await?;

        info!(job_id = %job_id, resume_step = %plan.resume_step, "job retrying");
        self.sink.emit(EngineEvent::JobRetrying {
            job_id,
            resume_step: plan.resume_step.clone(),
        });

        self.dispatcher.drive(job_id).await?;
        Ok(RetryReceipt {
            status: JobStatus::Retrying,
            resume_step: plan.resume_step,
        })
    }

    /// Returns the fully bound step context for a worker.
    ///
    /// This is the worker's sole mechanism for obtaining its
    /// instructions; dispatch messages carry identifiers only. Hydration
    /// also moves a `dispatched` instance to `processing`.
    pub async fn hydrate(
        &self,
        job_id: Uuid,
        step_name: &str,
        instance_index: Option<u32>,
    ) -> Result<HydratedStep, WaveflowError> {
        let job = self.get(job_id).await?;
        let step = job
            .step(step_name)
            .ok_or_else(|| WaveflowError::StepNotFound {
                job_id,
                step: step_name.to_string(),
            })?;
        let index = instance_index.unwrap_or(0);
        let instance = step
            .instance(index)
            .ok_or_else(|| WaveflowError::InstanceNotFound {
                job_id,
                step: step_name.to_string(),
                index,
            })?;

        let outputs = resolve_outputs(step, &job)?;
        let command_spec =
            resolve_command_spec(&step.command_spec, &instance.resolved_inputs, &outputs);

        let mut parameters = BTreeMap::new();
        for (name, value) in &step.parameters {
            let resolved = match value {
                serde_json::Value::String(template) => {
                    serde_json::Value::String(resolve_template(template, &job, Some(step))?)
                }
                other => other.clone(),
            };
            parameters.insert(name.clone(), resolved);
        }

        let hydrated = HydratedStep {
            command_spec,
            resolved_inputs: instance.resolved_inputs.clone(),
            outputs,
            parameters,
        };

        // The worker has the step now: dispatched -> processing.
        let step_owned = step_name.to_string();
        self.store
            .mutate(
                job_id,
                Box::new(move |job| {
                    if let Some(step) = job.step_mut(&step_owned) {
                        if let Some(instance) = step.instance_mut(index) {
                            if instance.status == StepStatus::Dispatched {
                                instance.mark_processing();
                            }
                        }
                    }
                }),
            )
            .await?;

        Ok(hydrated)
    }

    /// Applies one status message directly and advances the job.
    ///
    /// The consumer pool does this continuously; tests and embedded
    /// setups can pump messages by hand.
    pub async fn handle_status_event(
        &self,
        message: &StepStatusMessage,
    ) -> Result<ApplyOutcome, WaveflowError> {
        let outcome = self.applier.apply(message).await?;
        if outcome == ApplyOutcome::Applied {
            self.dispatcher.drive(message.job_id).await?;
        }
        Ok(outcome)
    }
}
