//! Step dispatch: cache consult, thin-message emit, fan-out application.
//!
//! The dispatcher writes the store first and the bus second: an instance
//! is marked `dispatched` (with its deadline) before its message is
//! pushed, so a crash between the two leaves a reapable instance rather
//! than an untracked message.

use crate::bus::QueueBus;
use crate::cache::{cache_key, CacheIndex};
use crate::config::EngineConfig;
use crate::core::{
    join_counter_key, service_queue_name, Job, JobStatus, Step, StepDispatchMessage, StepInstance,
    StepStatus,
};
use crate::errors::WaveflowError;
use crate::events::{EngineEvent, EventSink};
use crate::manifest::ManifestRegistry;
use crate::planner::{Expansion, ReadyInstance};
use crate::store::JobStore;
use crate::utils::{now_utc, retry_with_backoff};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What became of one dispatch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A message was written to the service queue.
    Dispatched,
    /// The step was satisfied from the cache; no message was written.
    CacheHit,
    /// The instance was no longer dispatchable (duplicate request).
    Suppressed,
}

/// Emits ready instances to service queues and applies fan-outs.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    bus: Arc<dyn QueueBus>,
    cache: Arc<dyn CacheIndex>,
    registry: Arc<ManifestRegistry>,
    sink: Arc<dyn EventSink>,
    config: EngineConfig,
}

impl Dispatcher {
    /// Creates a dispatcher over the shared collaborators.
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

    /// Dispatches one ready instance.
    ///
    /// Deterministic operations consult the cache first; a live entry
    /// rewrites the instance as `skipped-cached` with the cached outputs
    /// bound, and the caller should re-plan. Dispatch is idempotent per
    /// (job, step, instance): a duplicate request is suppressed.
    pub async fn dispatch(
        &self,
        job: &Job,
        ready: &ReadyInstance,
    ) -> Result<DispatchOutcome, WaveflowError> {
        let step = job
            .step(&ready.step_name)
            .ok_or_else(|| WaveflowError::StepNotFound {
                job_id: job.job_id,
                step: ready.step_name.clone(),
            })?;
        let manifest = self.registry.get(&step.service).ok_or_else(|| {
            WaveflowError::Internal(format!("service '{}' missing from registry", step.service))
        })?;
        let op = manifest.operation(&step.operation).ok_or_else(|| {
            WaveflowError::Internal(format!(
                "operation '{}' missing from manifest '{}'",
                step.operation, step.service
            ))
        })?;

        let key = if op.deterministic {
            Some(cache_key(
                &step.service,
                &step.command_spec.program,
                &step.parameters,
                &input_checksums(job, step, &ready.resolved_inputs),
            ))
        } else {
            None
        };

        if let Some(ref key) = key {
            if let Some(entry) = self.cache.lookup(key).await? {
                return self.apply_cache_hit(job.job_id, ready, key, entry.outputs).await;
            }
        }

        let deadline_secs = self.config.effective_timeout_secs(op.timeout_secs);
        let deadline = now_utc() + chrono::Duration::seconds(deadline_secs as i64);

        let step_name = ready.step_name.clone();
        let index = ready.instance_index;
        let resolved = ready.resolved_inputs.clone();
        let cache_key_for_store = key.clone();
        let applied = Arc::new(AtomicBool::new(false));
        let applied_flag = applied.clone();

        let updated = self
            .store
            .mutate(
                job.job_id,
                Box::new(move |job| {
                    let Some(step) = job.step_mut(&step_name) else {
                        return;
                    };
                    let Some(instance) = step.instance_mut(index) else {
                        return;
                    };
                    if !matches!(instance.status, StepStatus::Pending | StepStatus::Ready) {
                        return;
                    }
                    instance.mark_ready(resolved);
                    instance.cache_key = cache_key_for_store;
                    instance.mark_dispatched(Some(deadline));
                    applied_flag.store(true, Ordering::SeqCst);
                }),
            )
            .await?;

        if !applied.load(Ordering::SeqCst) {
            debug!(
                job_id = %job.job_id,
                step = %ready.step_name,
                instance = ready.instance_index,
                "dispatch suppressed: instance no longer dispatchable"
            );
            return Ok(DispatchOutcome::Suppressed);
        }

        let expanded = updated.step(&ready.step_name).is_some_and(|s| s.expanded);
        let message = StepDispatchMessage::new(
            job.job_id,
            ready.step_name.clone(),
            expanded.then_some(ready.instance_index),
        );
        let payload = serde_json::to_string(&message)?;
        let queue = service_queue_name(&step.service);

        let push = retry_with_backoff(
            self.config.apply_retry_attempts,
            self.config.apply_backoff_base,
            || self.bus.push(&queue, payload.clone()),
        )
        .await;
        if let Err(err) = push {
            // The instance stays dispatched; the sweeper reaps it at its
            // deadline if the queue never recovers.
            warn!(job_id = %job.job_id, step = %ready.step_name, error = %err, "dispatch push failed");
            return Err(err.into());
        }

        info!(
            job_id = %job.job_id,
            step = %ready.step_name,
            instance = ready.instance_index,
            queue = %queue,
            "step dispatched"
        );
        self.sink.emit(EngineEvent::StepDispatched {
            job_id: job.job_id,
            step: ready.step_name.clone(),
            instance: ready.instance_index,
            queue,
        });
        Ok(DispatchOutcome::Dispatched)
    }

    async fn apply_cache_hit(
        &self,
        job_id: Uuid,
        ready: &ReadyInstance,
        key: &str,
        outputs: BTreeMap<String, serde_json::Value>,
    ) -> Result<DispatchOutcome, WaveflowError> {
        let step_name = ready.step_name.clone();
        let index = ready.instance_index;
        let resolved = ready.resolved_inputs.clone();
        let key_owned = key.to_string();

        self.store
            .mutate(
                job_id,
                Box::new(move |job| {
                    let Some(step) = job.step_mut(&step_name) else {
                        return;
                    };
                    let Some(instance) = step.instance_mut(index) else {
                        return;
                    };
                    if !matches!(instance.status, StepStatus::Pending | StepStatus::Ready) {
                        return;
                    }
                    instance.mark_ready(resolved);
                    instance.cache_key = Some(key_owned);
                    instance.mark_skipped_cached(outputs);
                }),
            )
            .await?;

        info!(job_id = %job_id, step = %ready.step_name, "cache hit, step skipped");
        self.sink.emit(EngineEvent::StepCacheHit {
            job_id,
            step: ready.step_name.clone(),
            cache_key: key.to_string(),
        });
        Ok(DispatchOutcome::CacheHit)
    }

    /// Materialises a fan-out: N ready instances replace the single
    /// pending one, and every downstream consumer's join counter is
    /// initialised to N (summed when several fan-outs feed one join).
    pub async fn apply_expansion(
        &self,
        job_id: Uuid,
        expansion: &Expansion,
    ) -> Result<(), WaveflowError> {
        let step_name = expansion.step_name.clone();
        let per_instance = expansion.per_instance_inputs.clone();
        let count = per_instance.len();
        let applied = Arc::new(AtomicBool::new(false));
        let applied_flag = applied.clone();

        let updated = self
            .store
            .mutate(
                job_id,
                Box::new(move |job| {
                    let Some(step) = job.step_mut(&step_name) else {
                        return;
                    };
                    if step.expanded {
                        return;
                    }
                    step.instances = per_instance
                        .into_iter()
                        .enumerate()
                        .map(|(i, inputs)| {
                            let mut instance = StepInstance::new(i as u32);
                            instance.mark_ready(inputs);
                            instance
                        })
                        .collect();
                    step.expanded = true;
                    applied_flag.store(true, Ordering::SeqCst);
                }),
            )
            .await?;

        if !applied.load(Ordering::SeqCst) {
            return Ok(());
        }

        for transition in updated.transitions_out_of(&expansion.step_name) {
            let key = join_counter_key(job_id, &transition.to);
            let existing = self.bus.counter_get(&key).await?.unwrap_or(0);
            self.bus.counter_init(&key, existing + count as i64).await?;
        }

        info!(job_id = %job_id, step = %expansion.step_name, instances = count, "step fanned out");
        self.sink.emit(EngineEvent::StepFannedOut {
            job_id,
            step: expansion.step_name.clone(),
            instances: count as u32,
        });
        Ok(())
    }
}

impl Dispatcher {
    /// Drives a job forward until nothing more can be dispatched:
    /// applies pending fan-outs, dispatches every ready instance
    /// (re-planning after cache hits), then settles the overall status
    /// through compare-and-set.
    pub async fn drive(&self, job_id: Uuid) -> Result<(), WaveflowError> {
        loop {
            let job = self
                .store
                .get(job_id)
                .await?
                .ok_or(WaveflowError::JobNotFound { job_id })?;
            let plan = crate::planner::plan(&job, &self.registry)?;

            if !plan.expansions.is_empty() {
                for expansion in &plan.expansions {
                    self.apply_expansion(job_id, expansion).await?;
                }
                continue;
            }

            let mut cache_hits = false;
            for ready in &plan.ready {
                if self.dispatch(&job, ready).await? == DispatchOutcome::CacheHit {
                    cache_hits = true;
                }
            }
            if cache_hits {
                continue;
            }

            self.settle_status(job_id).await?;
            return Ok(());
        }
    }

    /// Applies the derived overall status through compare-and-set.
    ///
    /// The terminal transitions (`complete`, `failed`) happen at most
    /// once per retry generation: a racing consumer loses the CAS and
    /// emits nothing.
    async fn settle_status(&self, job_id: Uuid) -> Result<(), WaveflowError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(WaveflowError::JobNotFound { job_id })?;
        let derived = job.derived_status();

        match derived {
            JobStatus::Complete if job.status != JobStatus::Complete => {
                if self
                    .store
                    .compare_and_set_status(job_id, job.status, JobStatus::Complete)
                    .await?
                {
                    info!(job_id = %job_id, "job completed");
                    self.sink.emit(EngineEvent::JobCompleted {
                        job_id,
                        retry_generation: job.retry_generation,
                    });
                }
            }
            JobStatus::Failed if job.status != JobStatus::Failed => {
                if self
                    .store
                    .compare_and_set_status(job_id, job.status, JobStatus::Failed)
                    .await?
                {
                    warn!(job_id = %job_id, "job failed");
                    self.sink.emit(EngineEvent::JobFailed {
                        job_id,
                        retry_generation: job.retry_generation,
                    });
                }
            }
            _ => {
                // First dispatch moves a pending or retrying job to
                // processing.
                if matches!(job.status, JobStatus::Pending | JobStatus::Retrying)
                    && job.has_in_flight_work()
                {
                    self.store
                        .compare_and_set_status(job_id, job.status, JobStatus::Processing)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

/// Collects the content checksums backing each resolved input.
///
/// Producer-reported checksums are used where a transition supplied the
/// binding; literal bindings fall back to the reference string itself.
fn input_checksums(
    job: &Job,
    step: &Step,
    resolved: &BTreeMap<String, serde_json::Value>,
) -> Vec<String> {
    let mut checksums = Vec::new();
    for (input_name, value) in resolved {
        match producer_checksums(job, step, input_name) {
            Some(found) => checksums.extend(found),
            None => checksums.push(plain_string(value)),
        }
    }
    checksums
}

fn producer_checksums(job: &Job, step: &Step, input_name: &str) -> Option<Vec<String>> {
    for transition in job.transitions_into(&step.name) {
        let Some((producer_output, _)) = transition
            .mapping
            .iter()
            .find(|(_, consumer_input)| consumer_input.as_str() == input_name)
        else {
            continue;
        };
        let producer = job.step(&transition.from)?;
        let mut sorted: Vec<&StepInstance> = producer.instances.iter().collect();
        sorted.sort_by_key(|i| i.index);
        let found: Vec<String> = sorted
            .iter()
            .filter_map(|i| i.output_checksums.get(producer_output).cloned())
            .collect();
        if !found.is_empty() {
            return Some(found);
        }
    }
    None
}

fn plain_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryQueueBus;
    use crate::cache::{CacheEntry, MemoryCacheIndex};
    use crate::core::{CommandSpec, Transition};
    use crate::events::CollectingEventSink;
    use crate::manifest::{
        InputDescriptor, OperationSpec, OutputDescriptor, ServiceManifest,
    };
    use crate::store::MemoryJobStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryJobStore>,
        bus: Arc<MemoryQueueBus>,
        cache: Arc<MemoryCacheIndex>,
        sink: Arc<CollectingEventSink>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ManifestRegistry::new());
        registry.register(
            ServiceManifest::new("audio_service")
                .with_operation(
                    OperationSpec::new("transform")
                        .with_input(InputDescriptor::single("in"))
                        .with_output(OutputDescriptor::single("out"))
                        .with_timeout(120),
                )
                .with_operation(
                    OperationSpec::new("deterministic_transform")
                        .with_input(InputDescriptor::single("in"))
                        .with_output(OutputDescriptor::single("out"))
                        .deterministic(3600),
                ),
        );
        let store = Arc::new(MemoryJobStore::new());
        let bus = Arc::new(MemoryQueueBus::new());
        let cache = Arc::new(MemoryCacheIndex::new());
        let sink = Arc::new(CollectingEventSink::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            bus.clone(),
            cache.clone(),
            registry,
            sink.clone(),
            EngineConfig::default(),
        );
        Fixture {
            store,
            bus,
            cache,
            sink,
            dispatcher,
        }
    }

    fn transform_step(name: &str, operation: &str) -> Step {
        Step::new(name, "audio_service", operation, CommandSpec::new("sox"))
            .with_input("in", "file:///in.wav")
            .with_output("out", "out.wav")
    }

    fn ready(step: &str) -> ReadyInstance {
        ReadyInstance {
            step_name: step.to_string(),
            instance_index: 0,
            resolved_inputs: BTreeMap::from([(
                "in".to_string(),
                serde_json::json!("file:///in.wav"),
            )]),
        }
    }

    #[tokio::test]
    async fn test_dispatch_writes_store_then_queue() {
        let f = fixture();
        let job = Job::new("u", vec![transform_step("a", "transform")], vec![]);
        let job_id = job.job_id;
        f.store.insert(job.clone()).await.unwrap();

        let outcome = f.dispatcher.dispatch(&job, &ready("a")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Dispatched);

        let stored = f.store.get(job_id).await.unwrap().unwrap();
        let instance = stored.step("a").unwrap().instance(0).unwrap();
        assert_eq!(instance.status, StepStatus::Dispatched);
        assert!(instance.deadline.is_some());
        assert!(instance.cache_key.is_none());

        let payload = f
            .bus
            .pop("audio_service_queue", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let message: StepDispatchMessage = serde_json::from_str(&payload).unwrap();
        assert_eq!(message.job_id, job_id);
        assert_eq!(message.step_name, "a");
        assert!(message.instance_index.is_none());
    }

    #[tokio::test]
    async fn test_second_dispatch_is_suppressed() {
        let f = fixture();
        let job = Job::new("u", vec![transform_step("a", "transform")], vec![]);
        f.store.insert(job.clone()).await.unwrap();

        assert_eq!(
            f.dispatcher.dispatch(&job, &ready("a")).await.unwrap(),
            DispatchOutcome::Dispatched
        );
        assert_eq!(
            f.dispatcher.dispatch(&job, &ready("a")).await.unwrap(),
            DispatchOutcome::Suppressed
        );
        assert_eq!(
            f.bus.queue_len("audio_service_queue").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_cache_hit_skips_dispatch() {
        let f = fixture();
        let step = transform_step("p", "deterministic_transform");
        let job = Job::new("u", vec![step.clone()], vec![]);
        f.store.insert(job.clone()).await.unwrap();

        // Prime the cache under the key dispatch will derive
        let key = cache_key(
            "audio_service",
            "sox",
            &step.parameters,
            &["file:///in.wav".to_string()],
        );
        f.cache
            .put(
                &key,
                CacheEntry::new(
                    BTreeMap::from([("out".to_string(), serde_json::json!("cached.wav"))]),
                    3600,
                ),
            )
            .await
            .unwrap();

        let outcome = f.dispatcher.dispatch(&job, &ready("p")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::CacheHit);

        let stored = f.store.get(job.job_id).await.unwrap().unwrap();
        let instance = stored.step("p").unwrap().instance(0).unwrap();
        assert_eq!(instance.status, StepStatus::SkippedCached);
        assert_eq!(instance.outputs["out"], serde_json::json!("cached.wav"));
        assert_eq!(instance.cache_key.as_deref(), Some(key.as_str()));

        assert_eq!(f.bus.queue_len("audio_service_queue").await.unwrap(), 0);
        assert_eq!(f.sink.of_kind("step.cache_hit").len(), 1);
    }

    #[tokio::test]
    async fn test_deterministic_miss_records_cache_key() {
        let f = fixture();
        let job = Job::new(
            "u",
            vec![transform_step("p", "deterministic_transform")],
            vec![],
        );
        f.store.insert(job.clone()).await.unwrap();

        let outcome = f.dispatcher.dispatch(&job, &ready("p")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Dispatched);

        let stored = f.store.get(job.job_id).await.unwrap().unwrap();
        assert!(stored.step("p").unwrap().instance(0).unwrap().cache_key.is_some());
    }

    #[tokio::test]
    async fn test_apply_expansion_creates_instances_and_counters() {
        let f = fixture();
        let analyze = transform_step("analyze", "transform");
        let aggregate = transform_step("aggregate", "transform");
        let t = Transition::new("analyze", "aggregate").with_mapping("out", "in");
        let job = Job::new("u", vec![analyze, aggregate], vec![t]);
        let job_id = job.job_id;
        f.store.insert(job).await.unwrap();

        let expansion = Expansion {
            step_name: "analyze".to_string(),
            per_instance_inputs: (0..4)
                .map(|i| {
                    BTreeMap::from([("in".to_string(), serde_json::json!(format!("c{i}.wav")))])
                })
                .collect(),
        };
        f.dispatcher.apply_expansion(job_id, &expansion).await.unwrap();

        let stored = f.store.get(job_id).await.unwrap().unwrap();
        let step = stored.step("analyze").unwrap();
        assert!(step.expanded);
        assert_eq!(step.instances.len(), 4);
        assert!(step.instances.iter().all(|i| i.status == StepStatus::Ready));

        let counter = f
            .bus
            .counter_get(&join_counter_key(job_id, "aggregate"))
            .await
            .unwrap();
        assert_eq!(counter, Some(4));

        // Re-applying is a no-op
        f.dispatcher.apply_expansion(job_id, &expansion).await.unwrap();
        let counter = f
            .bus
            .counter_get(&join_counter_key(job_id, "aggregate"))
            .await
            .unwrap();
        assert_eq!(counter, Some(4));
    }

    #[tokio::test]
    async fn test_expanded_instance_message_carries_index() {
        let f = fixture();
        let mut analyze = transform_step("analyze", "transform");
        analyze.expanded = true;
        analyze.instances = vec![StepInstance::new(0), StepInstance::new(1)];
        let job = Job::new("u", vec![analyze], vec![]);
        f.store.insert(job.clone()).await.unwrap();

        let request = ReadyInstance {
            step_name: "analyze".to_string(),
            instance_index: 1,
            resolved_inputs: BTreeMap::new(),
        };
        f.dispatcher.dispatch(&job, &request).await.unwrap();

        let payload = f
            .bus
            .pop("audio_service_queue", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let message: StepDispatchMessage = serde_json::from_str(&payload).unwrap();
        assert_eq!(message.instance_index, Some(1));
    }
}
