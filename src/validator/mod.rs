//! Pipeline validation against service manifests.
//!
//! Validation runs at submission and is fatal: a pipeline that fails any
//! check is never persisted. Each error names the offending step and
//! field and carries a stable `PIPELINE-*` code.

use crate::core::{Step, StepInstance, Transition};
use crate::errors::{PipelineValidationError, ValidationErrorInfo, ValidationSuggestions};
use crate::manifest::{ManifestRegistry, OperationSpec};
use std::collections::{HashMap, HashSet};

/// Validates a submitted pipeline against the registered manifests.
///
/// # Errors
///
/// Returns the first violation found, in deterministic order: step-local
/// checks (service, operation, parameters, outputs) in declared step
/// order, then edge checks, then binding checks, then acyclicity.
pub fn validate_pipeline(
    steps: &[Step],
    transitions: &[Transition],
    registry: &ManifestRegistry,
) -> Result<(), PipelineValidationError> {
    if steps.is_empty() {
        return Err(coded_error(
            "Pipeline contains no steps",
            "PIPELINE-005-BINDING",
            None,
            None,
        ));
    }

    check_unique_names(steps)?;
    for step in steps {
        let Some(manifest) = registry.get(&step.service) else {
            return Err(coded_error(
                format!("Step '{}' names unknown service '{}'", step.name, step.service),
                "PIPELINE-001-SERVICE",
                Some(&step.name),
                Some("service"),
            ));
        };
        let Some(op) = manifest.operation(&step.operation) else {
            return Err(coded_error(
                format!(
                    "Step '{}' names unknown operation '{}' on service '{}'",
                    step.name, step.operation, step.service
                ),
                "PIPELINE-001-SERVICE",
                Some(&step.name),
                Some("operation"),
            ));
        };
        check_parameters(step, op)?;
        check_outputs(step, op)?;
    }
    check_edges(steps, transitions)?;
    check_bindings(steps, transitions, registry)?;
    check_acyclic(steps, transitions)?;
    Ok(())
}

/// Normalises submitted steps for persistence: each step starts with a
/// single fresh pending instance and no fan-out expansion.
#[must_use]
pub fn normalize_steps(mut steps: Vec<Step>) -> Vec<Step> {
    for step in &mut steps {
        step.instances = vec![StepInstance::new(0)];
        step.expanded = false;
    }
    steps
}

fn check_unique_names(steps: &[Step]) -> Result<(), PipelineValidationError> {
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.name.as_str()) {
            return Err(coded_error(
                format!("Duplicate step name '{}'", step.name),
                "PIPELINE-003-EDGE",
                Some(&step.name),
                None,
            ));
        }
    }
    Ok(())
}

fn check_parameters(step: &Step, op: &OperationSpec) -> Result<(), PipelineValidationError> {
    for descriptor in &op.params {
        match step.parameters.get(&descriptor.name) {
            Some(value) => {
                if let Err(reason) = descriptor.check(value) {
                    return Err(coded_error(
                        format!("Step '{}': parameter {reason}", step.name),
                        "PIPELINE-002-PARAM",
                        Some(&step.name),
                        Some(&descriptor.name),
                    ));
                }
            }
            None if descriptor.required => {
                return Err(coded_error(
                    format!(
                        "Step '{}' is missing required parameter '{}'",
                        step.name, descriptor.name
                    ),
                    "PIPELINE-002-PARAM",
                    Some(&step.name),
                    Some(&descriptor.name),
                ));
            }
            None => {}
        }
    }
    for name in step.parameters.keys() {
        if op.param(name).is_none() {
            return Err(coded_error(
                format!("Step '{}' supplies unknown parameter '{name}'", step.name),
                "PIPELINE-002-PARAM",
                Some(&step.name),
                Some(name),
            ));
        }
    }
    Ok(())
}

fn check_outputs(step: &Step, op: &OperationSpec) -> Result<(), PipelineValidationError> {
    for name in step.outputs.keys() {
        if op.output(name).is_none() {
            return Err(coded_error(
                format!(
                    "Step '{}' declares output '{name}' not present in operation '{}'",
                    step.name, op.name
                ),
                "PIPELINE-006-OUTPUT",
                Some(&step.name),
                Some(name),
            ));
        }
    }
    for descriptor in &op.outputs {
        if !step.outputs.contains_key(&descriptor.name) {
            return Err(coded_error(
                format!(
                    "Step '{}' has no destination for output '{}'",
                    step.name, descriptor.name
                ),
                "PIPELINE-006-OUTPUT",
                Some(&step.name),
                Some(&descriptor.name),
            ));
        }
    }
    Ok(())
}

fn check_edges(steps: &[Step], transitions: &[Transition]) -> Result<(), PipelineValidationError> {
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    for transition in transitions {
        let Some(&from_idx) = index.get(transition.from.as_str()) else {
            return Err(coded_error(
                format!("Transition references unknown step '{}'", transition.from),
                "PIPELINE-003-EDGE",
                Some(&transition.from),
                None,
            ));
        };
        let Some(&to_idx) = index.get(transition.to.as_str()) else {
            return Err(coded_error(
                format!("Transition references unknown step '{}'", transition.to),
                "PIPELINE-003-EDGE",
                Some(&transition.to),
                None,
            ));
        };
        if from_idx >= to_idx {
            return Err(coded_error(
                format!(
                    "Transition '{}' -> '{}' is a back-edge: producers must be declared before consumers",
                    transition.from, transition.to
                ),
                "PIPELINE-003-EDGE",
                Some(&transition.to),
                None,
            ));
        }
    }
    Ok(())
}

fn check_bindings(
    steps: &[Step],
    transitions: &[Transition],
    registry: &ManifestRegistry,
) -> Result<(), PipelineValidationError> {
    for step in steps {
        let manifest = registry.get(&step.service).ok_or_else(|| {
            coded_error(
                format!("Step '{}' names unknown service '{}'", step.name, step.service),
                "PIPELINE-001-SERVICE",
                Some(&step.name),
                Some("service"),
            )
        })?;
        let op = manifest.operation(&step.operation).ok_or_else(|| {
            coded_error(
                format!(
                    "Step '{}' names unknown operation '{}'",
                    step.name, step.operation
                ),
                "PIPELINE-001-SERVICE",
                Some(&step.name),
                Some("operation"),
            )
        })?;

        let incoming = transitions.iter().filter(|t| t.to == step.name);
        let mut transition_bindings: HashMap<&str, usize> = HashMap::new();
        for transition in incoming {
            let producer = steps.iter().find(|s| s.name == transition.from);
            for (producer_output, consumer_input) in &transition.mapping {
                if let Some(producer) = producer {
                    if !producer.outputs.contains_key(producer_output) {
                        return Err(coded_error(
                            format!(
                                "Transition '{}' -> '{}' maps undeclared producer output '{producer_output}'",
                                transition.from, transition.to
                            ),
                            "PIPELINE-005-BINDING",
                            Some(&transition.from),
                            Some(producer_output),
                        ));
                    }
                }
                if op.input(consumer_input).is_none() {
                    return Err(coded_error(
                        format!(
                            "Transition '{}' -> '{}' binds unknown input '{consumer_input}'",
                            transition.from, transition.to
                        ),
                        "PIPELINE-005-BINDING",
                        Some(&step.name),
                        Some(consumer_input),
                    ));
                }
                *transition_bindings.entry(consumer_input.as_str()).or_insert(0) += 1;
            }
        }

        for placeholder in step.inputs.keys() {
            if op.input(placeholder).is_none() {
                return Err(coded_error(
                    format!(
                        "Step '{}' supplies literal for unknown input '{placeholder}'",
                        step.name
                    ),
                    "PIPELINE-005-BINDING",
                    Some(&step.name),
                    Some(placeholder),
                ));
            }
        }

        for input in &op.inputs {
            let literal = usize::from(step.inputs.contains_key(&input.name));
            let edges = transition_bindings.get(input.name.as_str()).copied().unwrap_or(0);
            let total = literal + edges;
            if total == 0 {
                return Err(coded_error(
                    format!(
                        "Step '{}': input '{}' has no binding (literal or transition)",
                        step.name, input.name
                    ),
                    "PIPELINE-005-BINDING",
                    Some(&step.name),
                    Some(&input.name),
                ));
            }
            if total > 1 {
                return Err(coded_error(
                    format!(
                        "Step '{}': input '{}' is bound {total} times",
                        step.name, input.name
                    ),
                    "PIPELINE-005-BINDING",
                    Some(&step.name),
                    Some(&input.name),
                ));
            }
        }
    }
    Ok(())
}

fn check_acyclic(steps: &[Step], transitions: &[Transition]) -> Result<(), PipelineValidationError> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for transition in transitions {
        adjacency
            .entry(transition.from.as_str())
            .or_default()
            .push(transition.to.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_path: Vec<&str> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        on_path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = on_path.iter().position(|n| *n == node) {
            let mut cycle: Vec<String> = on_path[pos..].iter().map(|s| (*s).to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if visited.contains(node) {
            return None;
        }
        on_path.push(node);
        if let Some(next) = adjacency.get(node) {
            for target in next {
                if let Some(cycle) = visit(target, adjacency, visited, on_path) {
                    return Some(cycle);
                }
            }
        }
        on_path.pop();
        visited.insert(node);
        None
    }

    for step in steps {
        if let Some(cycle) = visit(step.name.as_str(), &adjacency, &mut visited, &mut on_path) {
            return Err(coded_error(
                format!("Pipeline contains a cycle: {}", cycle.join(" -> ")),
                "PIPELINE-004-CYCLE",
                None,
                None,
            ));
        }
    }
    Ok(())
}

fn coded_error(
    message: impl Into<String>,
    code: &str,
    step: Option<&str>,
    field: Option<&str>,
) -> PipelineValidationError {
    let message = message.into();
    let mut info = ValidationErrorInfo::new(code, message.clone());
    if let Some(hint) = ValidationSuggestions::get(code) {
        info = info.with_fix_hint(hint);
    }
    let mut err = PipelineValidationError::new(message).with_error_info(info);
    if let Some(step) = step {
        err = err.with_step(step);
    }
    if let Some(field) = field {
        err = err.with_field(field);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CommandSpec;
    use crate::manifest::{
        InputDescriptor, OperationSpec, OutputDescriptor, ParamDescriptor, ParamKind,
        ServiceManifest,
    };

    fn registry() -> ManifestRegistry {
        let registry = ManifestRegistry::new();
        registry.register(
            ServiceManifest::new("audio_service")
                .with_operation(
                    OperationSpec::new("normalize")
                        .with_input(InputDescriptor::single("audio"))
                        .with_output(OutputDescriptor::single("normalized"))
                        .with_param(
                            ParamDescriptor::new(
                                "target_db",
                                ParamKind::Float { min: Some(-60.0), max: Some(0.0) },
                            )
                            .required(),
                        ),
                )
                .with_operation(
                    OperationSpec::new("split")
                        .with_input(InputDescriptor::single("audio"))
                        .with_output(OutputDescriptor::collection("chunks")),
                ),
        );
        registry
    }

    fn normalize_step(name: &str) -> Step {
        Step::new(name, "audio_service", "normalize", CommandSpec::new("sox"))
            .with_input("audio", "file:///in.wav")
            .with_output("normalized", "{{composite_name}}/out.wav")
            .with_parameter("target_db", serde_json::json!(-14.0))
    }

    #[test]
    fn test_valid_single_step() {
        let steps = vec![normalize_step("n")];
        assert!(validate_pipeline(&steps, &[], &registry()).is_ok());
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        assert!(validate_pipeline(&[], &[], &registry()).is_err());
    }

    #[test]
    fn test_unknown_service() {
        let steps = vec![Step::new("x", "ghost_service", "op", CommandSpec::new("p"))];
        let err = validate_pipeline(&steps, &[], &registry()).unwrap_err();
        assert_eq!(err.error_info.unwrap().code, "PIPELINE-001-SERVICE");
    }

    #[test]
    fn test_unknown_operation() {
        let steps = vec![Step::new("x", "audio_service", "reverse", CommandSpec::new("p"))];
        let err = validate_pipeline(&steps, &[], &registry()).unwrap_err();
        assert_eq!(err.field, Some("operation".to_string()));
    }

    #[test]
    fn test_param_out_of_range() {
        let mut step = normalize_step("n");
        step.parameters
            .insert("target_db".to_string(), serde_json::json!(5.0));
        let err = validate_pipeline(&[step], &[], &registry()).unwrap_err();
        let info = err.error_info.unwrap();
        assert_eq!(info.code, "PIPELINE-002-PARAM");
        assert!(info.fix_hint.is_some());
    }

    #[test]
    fn test_missing_required_param() {
        let mut step = normalize_step("n");
        step.parameters.clear();
        let err = validate_pipeline(&[step], &[], &registry()).unwrap_err();
        assert!(err.message.contains("required parameter"));
    }

    #[test]
    fn test_unknown_param_rejected() {
        let step = normalize_step("n").with_parameter("bogus", serde_json::json!(1));
        let err = validate_pipeline(&[step], &[], &registry()).unwrap_err();
        assert!(err.message.contains("unknown parameter 'bogus'"));
    }

    #[test]
    fn test_undeclared_output_rejected() {
        let step = normalize_step("n").with_output("extra", "x");
        let err = validate_pipeline(&[step], &[], &registry()).unwrap_err();
        assert_eq!(err.error_info.unwrap().code, "PIPELINE-006-OUTPUT");
    }

    #[test]
    fn test_missing_output_destination_rejected() {
        let mut step = normalize_step("n");
        step.outputs.clear();
        let err = validate_pipeline(&[step], &[], &registry()).unwrap_err();
        assert!(err.message.contains("no destination"));
    }

    #[test]
    fn test_back_edge_rejected() {
        let a = normalize_step("a");
        let mut b = normalize_step("b");
        b.inputs.clear();
        let t = Transition::new("b", "a").with_mapping("normalized", "audio");
        let err = validate_pipeline(&[a, b], &[t], &registry()).unwrap_err();
        assert!(err.message.contains("back-edge"));
    }

    #[test]
    fn test_transition_to_unknown_step() {
        let steps = vec![normalize_step("a")];
        let t = Transition::new("a", "ghost").with_mapping("normalized", "audio");
        let err = validate_pipeline(&steps, &[t], &registry()).unwrap_err();
        assert_eq!(err.error_info.unwrap().code, "PIPELINE-003-EDGE");
    }

    #[test]
    fn test_unbound_input_rejected() {
        let mut step = normalize_step("n");
        step.inputs.clear();
        let err = validate_pipeline(&[step], &[], &registry()).unwrap_err();
        assert!(err.message.contains("no binding"));
    }

    #[test]
    fn test_double_binding_rejected() {
        let a = normalize_step("a");
        // b keeps its literal AND receives a transition on the same input
        let b = normalize_step("b");
        let t = Transition::new("a", "b").with_mapping("normalized", "audio");
        let err = validate_pipeline(&[a, b], &[t], &registry()).unwrap_err();
        assert!(err.message.contains("bound 2 times"));
    }

    #[test]
    fn test_valid_chain() {
        let a = normalize_step("a");
        let mut b = normalize_step("b");
        b.inputs.clear();
        let t = Transition::new("a", "b").with_mapping("normalized", "audio");
        assert!(validate_pipeline(&[a, b], &[t], &registry()).is_ok());
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let steps = vec![normalize_step("same"), normalize_step("same")];
        let err = validate_pipeline(&steps, &[], &registry()).unwrap_err();
        assert!(err.message.contains("Duplicate step name"));
    }

    #[test]
    fn test_normalize_steps_resets_instances() {
        let mut step = normalize_step("n");
        step.expanded = true;
        step.instances.clear();

        let normalized = normalize_steps(vec![step]);
        assert_eq!(normalized[0].instances.len(), 1);
        assert!(!normalized[0].expanded);
    }
}
