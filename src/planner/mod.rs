//! The graph planner.
//!
//! The planner is a pure function over the job document: given the
//! current step and instance statuses it computes which instances are
//! ready to dispatch, which steps are blocked on unbound inputs, which
//! are done, and which declared steps must first be materialised into
//! fan-out instances. It never touches the store or the bus; the
//! orchestrator applies its output.

use crate::core::{Job, Step, StepStatus};
use crate::errors::WaveflowError;
use crate::manifest::{Cardinality, ManifestRegistry, OperationSpec};
use crate::template::resolve_template;
use std::collections::BTreeMap;

/// One dispatchable step instance with its fully bound inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyInstance {
    /// The step to dispatch.
    pub step_name: String,
    /// The instance to dispatch.
    pub instance_index: u32,
    /// Input placeholder -> bound value.
    pub resolved_inputs: BTreeMap<String, serde_json::Value>,
}

/// A declared step that must be materialised as N parallel instances.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    /// The step to expand.
    pub step_name: String,
    /// Bound inputs for each instance, in index order.
    pub per_instance_inputs: Vec<BTreeMap<String, serde_json::Value>>,
}

/// The planner's verdict over a job document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    /// Instances whose inputs are all bound, in declared step order.
    pub ready: Vec<ReadyInstance>,
    /// Pending steps still missing inputs (or behind a failed producer).
    pub blocked: Vec<String>,
    /// Steps whose every instance is terminal.
    pub done: Vec<String>,
    /// Fan-outs to materialise before any of their instances can run.
    pub expansions: Vec<Expansion>,
}

/// How one declared input resolves against the current document.
enum Binding {
    /// Fully bound to a value.
    Bound(serde_json::Value),
    /// A collection routed into a single-valued input: one instance per
    /// element.
    FanOut(Vec<serde_json::Value>),
    /// The producing side has not finished yet.
    Unbound,
}

/// Computes the plan for the current job document.
///
/// Ready instances are returned in declared step order (stable
/// tie-break), instances in index order.
///
/// # Errors
///
/// Returns an error on manifest lookups that should have been validated
/// at submission, on malformed templates, and on mismatched fan-out
/// element counts.
pub fn plan(job: &Job, registry: &ManifestRegistry) -> Result<Plan, WaveflowError> {
    let mut result = Plan::default();

    for step in &job.steps {
        // An expanded step with zero instances is a vacuous fan-out over
        // an empty collection: terminal by definition.
        let all_terminal = step.instances.iter().all(|i| i.status.is_terminal());
        if all_terminal && (!step.instances.is_empty() || step.expanded) {
            result.done.push(step.name.clone());
            continue;
        }

        if has_failed_producer(job, step) {
            result.blocked.push(step.name.clone());
            continue;
        }

        if step.expanded {
            // Instances were materialised with their inputs already bound.
            for instance in &step.instances {
                if instance.status == StepStatus::Ready {
                    result.ready.push(ReadyInstance {
                        step_name: step.name.clone(),
                        instance_index: instance.index,
                        resolved_inputs: instance.resolved_inputs.clone(),
                    });
                }
            }
            continue;
        }

        let Some(instance) = step.instance(0) else {
            continue;
        };
        match instance.status {
            StepStatus::Ready => {
                result.ready.push(ReadyInstance {
                    step_name: step.name.clone(),
                    instance_index: 0,
                    resolved_inputs: instance.resolved_inputs.clone(),
                });
                continue;
            }
            StepStatus::Pending => {}
            // Dispatched or processing: not ours to touch.
            _ => continue,
        }

        let Some(manifest) = registry.get(&step.service) else {
            return Err(WaveflowError::Internal(format!(
                "service '{}' missing from registry",
                step.service
            )));
        };
        let Some(op) = manifest.operation(&step.operation) else {
            return Err(WaveflowError::Internal(format!(
                "operation '{}' missing from manifest '{}'",
                step.operation, step.service
            )));
        };
        match resolve_step_bindings(job, step, op)? {
            Resolution::Ready(inputs) => result.ready.push(ReadyInstance {
                step_name: step.name.clone(),
                instance_index: 0,
                resolved_inputs: inputs,
            }),
            Resolution::FanOut(per_instance) => result.expansions.push(Expansion {
                step_name: step.name.clone(),
                per_instance_inputs: per_instance,
            }),
            Resolution::Blocked => result.blocked.push(step.name.clone()),
        }
    }

    Ok(result)
}

enum Resolution {
    Ready(BTreeMap<String, serde_json::Value>),
    FanOut(Vec<BTreeMap<String, serde_json::Value>>),
    Blocked,
}

fn has_failed_producer(job: &Job, step: &Step) -> bool {
    job.transitions_into(&step.name)
        .iter()
        .filter_map(|t| job.step(&t.from))
        .any(Step::is_failed)
}

/// Resolves every declared input of a pending, unexpanded step.
fn resolve_step_bindings(
    job: &Job,
    step: &Step,
    op: &OperationSpec,
) -> Result<Resolution, WaveflowError> {
    let mut bound: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    let mut fans: Vec<(String, Vec<serde_json::Value>)> = Vec::new();

    for input in &op.inputs {
        match resolve_input(job, step, &input.name, input.cardinality)? {
            Binding::Bound(value) => {
                bound.insert(input.name.clone(), value);
            }
            Binding::FanOut(elements) => {
                fans.push((input.name.clone(), elements));
            }
            Binding::Unbound => return Ok(Resolution::Blocked),
        }
    }

    if fans.is_empty() {
        return Ok(Resolution::Ready(bound));
    }

    let count = fans[0].1.len();
    if fans.iter().any(|(_, elements)| elements.len() != count) {
        return Err(WaveflowError::Internal(format!(
            "step '{}': collection inputs disagree on element count",
            step.name
        )));
    }

    let per_instance = (0..count)
        .map(|i| {
            let mut inputs = bound.clone();
            for (name, elements) in &fans {
                inputs.insert(name.clone(), elements[i].clone());
            }
            inputs
        })
        .collect();
    Ok(Resolution::FanOut(per_instance))
}

/// Resolves one declared input from its literal or its incoming edge.
fn resolve_input(
    job: &Job,
    step: &Step,
    input_name: &str,
    cardinality: Cardinality,
) -> Result<Binding, WaveflowError> {
    // Literal binding (possibly templated).
    if let Some(template) = step.inputs.get(input_name) {
        let value = resolve_template(template, job, Some(step))?;
        return Ok(Binding::Bound(serde_json::Value::String(value)));
    }

    // Transition binding: validation guarantees at most one edge binds it.
    for transition in job.transitions_into(&step.name) {
        let Some((producer_output, _)) = transition
            .mapping
            .iter()
            .find(|(_, consumer_input)| consumer_input.as_str() == input_name)
        else {
            continue;
        };
        let Some(producer) = job.step(&transition.from) else {
            continue;
        };
        if !producer.is_complete() {
            return Ok(Binding::Unbound);
        }
        return producer_binding(producer, producer_output, cardinality);
    }

    Ok(Binding::Unbound)
}

/// Turns a completed producer's recorded outputs into a binding.
fn producer_binding(
    producer: &Step,
    output_name: &str,
    cardinality: Cardinality,
) -> Result<Binding, WaveflowError> {
    if producer.expanded {
        let values = producer.instance_outputs(output_name);
        return Ok(match cardinality {
            // All parallel instances collapse into one ordered list.
            Cardinality::Collection => Binding::Bound(serde_json::Value::Array(values)),
            // Chained fan-out: one consumer instance per producer instance.
            Cardinality::Single => Binding::FanOut(values),
        });
    }

    let Some(instance) = producer.instance(0) else {
        return Ok(Binding::Unbound);
    };
    let Some(value) = instance.outputs.get(output_name) else {
        return Err(WaveflowError::Internal(format!(
            "producer '{}' completed without output '{output_name}'",
            producer.name
        )));
    };

    match (cardinality, value) {
        (Cardinality::Single, serde_json::Value::Array(elements)) => {
            // A collection output routed into a single-valued input is
            // the fan-out trigger.
            Ok(Binding::FanOut(elements.clone()))
        }
        (Cardinality::Single, other) => Ok(Binding::Bound(other.clone())),
        (Cardinality::Collection, serde_json::Value::Array(elements)) => {
            Ok(Binding::Bound(serde_json::Value::Array(elements.clone())))
        }
        (Cardinality::Collection, other) => Ok(Binding::Bound(serde_json::Value::Array(vec![
            other.clone(),
        ]))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CommandSpec, StepError, Transition};
    use crate::manifest::{InputDescriptor, OutputDescriptor, ServiceManifest};

    fn registry() -> ManifestRegistry {
        let registry = ManifestRegistry::new();
        registry.register(
            ServiceManifest::new("audio_service")
                .with_operation(
                    crate::manifest::OperationSpec::new("source")
                        .with_output(OutputDescriptor::single("out")),
                )
                .with_operation(
                    crate::manifest::OperationSpec::new("transform")
                        .with_input(InputDescriptor::single("in"))
                        .with_output(OutputDescriptor::single("out")),
                )
                .with_operation(
                    crate::manifest::OperationSpec::new("split")
                        .with_input(InputDescriptor::single("in"))
                        .with_output(OutputDescriptor::collection("chunks")),
                )
                .with_operation(
                    crate::manifest::OperationSpec::new("aggregate")
                        .with_input(InputDescriptor::collection("parts"))
                        .with_output(OutputDescriptor::single("out")),
                ),
        );
        registry
    }

    fn step(name: &str, operation: &str) -> Step {
        Step::new(name, "audio_service", operation, CommandSpec::new("prog"))
            .with_output(
                if operation == "split" { "chunks" } else { "out" },
                "dest",
            )
    }

    fn complete(job: &mut Job, name: &str, outputs: &[(&str, serde_json::Value)]) {
        job.step_mut(name).unwrap().instance_mut(0).unwrap().mark_complete(
            outputs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            BTreeMap::new(),
        );
    }

    #[test]
    fn test_source_step_is_ready() {
        let job = Job::new("u", vec![step("a", "source")], vec![]);
        let plan = plan(&job, &registry()).unwrap();

        assert_eq!(plan.ready.len(), 1);
        assert_eq!(plan.ready[0].step_name, "a");
        assert!(plan.blocked.is_empty());
    }

    #[test]
    fn test_literal_input_is_ready() {
        let s = step("a", "transform").with_input("in", "file:///in.wav");
        let job = Job::new("u", vec![s], vec![]);
        let plan = plan(&job, &registry()).unwrap();

        assert_eq!(plan.ready.len(), 1);
        assert_eq!(
            plan.ready[0].resolved_inputs["in"],
            serde_json::json!("file:///in.wav")
        );
    }

    #[test]
    fn test_literal_template_is_resolved() {
        let s = step("a", "transform").with_input("in", "{{user_id}}/in.wav");
        let job = Job::new("user-9", vec![s], vec![]);
        let plan = plan(&job, &registry()).unwrap();

        assert_eq!(
            plan.ready[0].resolved_inputs["in"],
            serde_json::json!("user-9/in.wav")
        );
    }

    #[test]
    fn test_consumer_blocked_until_producer_completes() {
        let a = step("a", "source");
        let b = step("b", "transform");
        let t = Transition::new("a", "b").with_mapping("out", "in");
        let mut job = Job::new("u", vec![a, b], vec![t]);

        let first = plan(&job, &registry()).unwrap();
        assert_eq!(first.ready.len(), 1);
        assert_eq!(first.blocked, vec!["b".to_string()]);

        complete(&mut job, "a", &[("out", serde_json::json!("x"))]);
        let second = plan(&job, &registry()).unwrap();
        assert_eq!(second.done, vec!["a".to_string()]);
        assert_eq!(second.ready.len(), 1);
        assert_eq!(second.ready[0].step_name, "b");
        assert_eq!(second.ready[0].resolved_inputs["in"], serde_json::json!("x"));
    }

    #[test]
    fn test_failed_producer_blocks_consumer() {
        let a = step("a", "source");
        let b = step("b", "transform");
        let t = Transition::new("a", "b").with_mapping("out", "in");
        let mut job = Job::new("u", vec![a, b], vec![t]);
        job.step_mut("a")
            .unwrap()
            .instance_mut(0)
            .unwrap()
            .mark_failed(StepError::application("X", "boom"));

        let plan = plan(&job, &registry()).unwrap();
        assert!(plan.ready.is_empty());
        assert_eq!(plan.done, vec!["a".to_string()]);
        assert_eq!(plan.blocked, vec!["b".to_string()]);
    }

    #[test]
    fn test_collection_output_into_single_input_fans_out() {
        let split = step("split", "split").with_input("in", "file:///in.wav");
        let analyze = step("analyze", "transform");
        let t = Transition::new("split", "analyze").with_mapping("chunks", "in");
        let mut job = Job::new("u", vec![split, analyze], vec![t]);
        complete(
            &mut job,
            "split",
            &[(
                "chunks",
                serde_json::json!(["c0.wav", "c1.wav", "c2.wav", "c3.wav"]),
            )],
        );

        let plan = plan(&job, &registry()).unwrap();
        assert_eq!(plan.expansions.len(), 1);
        let expansion = &plan.expansions[0];
        assert_eq!(expansion.step_name, "analyze");
        assert_eq!(expansion.per_instance_inputs.len(), 4);
        assert_eq!(
            expansion.per_instance_inputs[2]["in"],
            serde_json::json!("c2.wav")
        );
    }

    #[test]
    fn test_expanded_ready_instances_are_offered_in_index_order() {
        let mut analyze = step("analyze", "transform");
        analyze.expanded = true;
        analyze.instances = (0..3)
            .map(|i| {
                let mut inst = crate::core::StepInstance::new(i);
                inst.mark_ready(BTreeMap::from([(
                    "in".to_string(),
                    serde_json::json!(format!("c{i}.wav")),
                )]));
                inst
            })
            .collect();
        let job = Job::new("u", vec![analyze], vec![]);

        let plan = plan(&job, &registry()).unwrap();
        assert_eq!(plan.ready.len(), 3);
        assert_eq!(plan.ready[1].instance_index, 1);
    }

    #[test]
    fn test_join_blocked_until_every_instance_completes() {
        let mut analyze = step("analyze", "transform");
        analyze.expanded = true;
        analyze.instances = (0..2).map(crate::core::StepInstance::new).collect();
        analyze.instance_mut(0).unwrap().mark_complete(
            BTreeMap::from([("out".to_string(), serde_json::json!("a0"))]),
            BTreeMap::new(),
        );
        analyze.instance_mut(1).unwrap().status = StepStatus::Processing;

        let aggregate = step("aggregate", "aggregate");
        let t = Transition::new("analyze", "aggregate").with_mapping("out", "parts");
        let mut job = Job::new("u", vec![analyze, aggregate], vec![t]);

        let first = plan(&job, &registry()).unwrap();
        assert!(first.ready.is_empty());
        assert_eq!(first.blocked, vec!["aggregate".to_string()]);

        job.step_mut("analyze").unwrap().instance_mut(1).unwrap().mark_complete(
            BTreeMap::from([("out".to_string(), serde_json::json!("a1"))]),
            BTreeMap::new(),
        );
        let second = plan(&job, &registry()).unwrap();
        assert_eq!(second.ready.len(), 1);
        assert_eq!(second.ready[0].step_name, "aggregate");
        assert_eq!(
            second.ready[0].resolved_inputs["parts"],
            serde_json::json!(["a0", "a1"])
        );
    }

    #[test]
    fn test_collection_input_from_unexpanded_collection_output() {
        let split = step("split", "split").with_input("in", "x");
        let aggregate = step("aggregate", "aggregate");
        let t = Transition::new("split", "aggregate").with_mapping("chunks", "parts");
        let mut job = Job::new("u", vec![split, aggregate], vec![t]);
        complete(
            &mut job,
            "split",
            &[("chunks", serde_json::json!(["c0", "c1"]))],
        );

        let plan = plan(&job, &registry()).unwrap();
        assert_eq!(plan.ready.len(), 1);
        assert_eq!(
            plan.ready[0].resolved_inputs["parts"],
            serde_json::json!(["c0", "c1"])
        );
    }

    #[test]
    fn test_in_flight_instances_are_not_offered() {
        let mut s = step("a", "source");
        s.instance_mut(0).unwrap().status = StepStatus::Dispatched;
        let job = Job::new("u", vec![s], vec![]);

        let plan = plan(&job, &registry()).unwrap();
        assert!(plan.ready.is_empty());
        assert!(plan.done.is_empty());
    }

    #[test]
    fn test_ready_ordering_follows_declared_order() {
        let b = step("b", "source");
        let a = step("a", "source");
        // Declared order: b first, then a
        let job = Job::new("u", vec![b, a], vec![]);

        let plan = plan(&job, &registry()).unwrap();
        let names: Vec<&str> = plan.ready.iter().map(|r| r.step_name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
