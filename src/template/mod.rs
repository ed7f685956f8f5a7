//! Placeholder template resolution.
//!
//! Templates may reference:
//! - `{{job_id}}`
//! - `{{user_id}}`
//! - `{{step_name}}`
//! - `{{composite_name}}` (dir-safe service + program + step identifier)
//! - `{{steps.<step>.outputs.<key>}}` for cross-step references
//!
//! Unknown single-identifier placeholders are left untouched so that
//! command-spec placeholders (`{{input_audio}}`) survive path resolution
//! and are substituted later from the step's bound inputs and outputs.

use crate::core::{CommandSpec, Job, Step};
use crate::errors::TemplateError;
use std::collections::BTreeMap;

/// Resolves a template string against the job document.
///
/// `step` supplies the step-scoped placeholders (`{{step_name}}`,
/// `{{composite_name}}`); pass `None` for job-scoped templates.
///
/// # Errors
///
/// Returns `TemplateError` on unterminated placeholders and on
/// `{{steps.*}}` references to unknown steps or outputs.
pub fn resolve_template(
    template: &str,
    job: &Job,
    step: Option<&Step>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(TemplateError::Malformed {
                template: template.to_string(),
            });
        };
        let token = after[..end].trim();
        match resolve_token(token, job, step)? {
            Some(value) => out.push_str(&value),
            None => {
                // Not ours; keep the placeholder verbatim.
                out.push_str("{{");
                out.push_str(&after[..end]);
                out.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve_token(
    token: &str,
    job: &Job,
    step: Option<&Step>,
) -> Result<Option<String>, TemplateError> {
    match token {
        "job_id" => Ok(Some(job.job_id.to_string())),
        "user_id" => Ok(Some(job.user_id.clone())),
        "step_name" => Ok(step.map(|s| s.name.clone())),
        "composite_name" => Ok(step.map(Step::composite_name)),
        _ => {
            if let Some(reference) = token.strip_prefix("steps.") {
                return resolve_step_reference(reference, job).map(Some);
            }
            Ok(None)
        }
    }
}

/// Resolves `<step>.outputs.<key>` against a producer's recorded outputs.
///
/// For a fanned-out producer the reference resolves to the JSON list of
/// per-instance values in index order.
fn resolve_step_reference(reference: &str, job: &Job) -> Result<String, TemplateError> {
    let mut parts = reference.splitn(3, '.');
    let (Some(step_name), Some("outputs"), Some(key)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(TemplateError::Malformed {
            template: format!("{{{{steps.{reference}}}}}"),
        });
    };

    let target = job.step(step_name).ok_or_else(|| TemplateError::UnknownStep {
        step: step_name.to_string(),
    })?;

    if target.expanded {
        let values = target.instance_outputs(key);
        if values.is_empty() {
            return Err(TemplateError::UnknownOutput {
                step: step_name.to_string(),
                output: key.to_string(),
            });
        }
        return Ok(serde_json::Value::Array(values).to_string());
    }

    let instance = target
        .instance(0)
        .ok_or_else(|| TemplateError::UnknownStep {
            step: step_name.to_string(),
        })?;
    let value = instance
        .outputs
        .get(key)
        .ok_or_else(|| TemplateError::UnknownOutput {
            step: step_name.to_string(),
            output: key.to_string(),
        })?;
    Ok(value_to_string(value))
}

/// Resolves all of a step's output destination templates.
pub fn resolve_outputs(
    step: &Step,
    job: &Job,
) -> Result<BTreeMap<String, String>, TemplateError> {
    step.outputs
        .iter()
        .map(|(k, template)| Ok((k.clone(), resolve_template(template, job, Some(step))?)))
        .collect()
}

/// Substitutes command-spec placeholders from bound inputs and outputs.
///
/// A flag value or positional arg that is exactly `{{key}}` is replaced
/// by the binding for `key`, inputs taking precedence over outputs.
/// Anything else passes through unchanged.
#[must_use]
pub fn resolve_command_spec(
    spec: &CommandSpec,
    inputs: &BTreeMap<String, serde_json::Value>,
    outputs: &BTreeMap<String, String>,
) -> CommandSpec {
    let lookup = |value: &str| -> Option<serde_json::Value> {
        let key = value.strip_prefix("{{")?.strip_suffix("}}")?.trim();
        if let Some(bound) = inputs.get(key) {
            return Some(bound.clone());
        }
        outputs
            .get(key)
            .map(|s| serde_json::Value::String(s.clone()))
    };

    let mut resolved = spec.clone();
    for value in resolved.flags.values_mut() {
        if let serde_json::Value::String(s) = value {
            if let Some(bound) = lookup(s) {
                *value = bound;
            }
        }
    }
    for arg in &mut resolved.args {
        if let Some(bound) = lookup(arg) {
            *arg = value_to_string(&bound);
        }
    }
    resolved
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CommandSpec, Transition};
    use std::collections::BTreeMap;

    fn job_with_outputs() -> Job {
        let mut split = Step::new("split", "flucoma_service", "split", CommandSpec::new("fluid-noveltyslice"))
            .with_output("chunks", "{{composite_name}}/chunk.wav");
        split.instance_mut(0).unwrap().mark_complete(
            BTreeMap::from([("chunks".to_string(), serde_json::json!("s3://bucket/chunk.wav"))]),
            BTreeMap::new(),
        );
        let analyze = Step::new("analyze", "librosa_service", "mfcc", CommandSpec::new("librosa"));
        Job::new(
            "user-7",
            vec![split, analyze],
            vec![Transition::new("split", "analyze").with_mapping("chunks", "audio")],
        )
    }

    #[test]
    fn test_resolve_job_placeholders() {
        let job = job_with_outputs();
        let resolved = resolve_template("{{user_id}}/{{job_id}}/out", &job, None).unwrap();
        assert_eq!(resolved, format!("user-7/{}/out", job.job_id));
    }

    #[test]
    fn test_resolve_step_placeholders() {
        let job = job_with_outputs();
        let step = job.step("split").unwrap();
        let resolved = resolve_template("{{composite_name}}/{{step_name}}.wav", &job, Some(step)).unwrap();
        assert_eq!(
            resolved,
            "flucoma_service_fluid-noveltyslice_split/split.wav"
        );
    }

    #[test]
    fn test_resolve_cross_step_reference() {
        let job = job_with_outputs();
        let resolved = resolve_template("{{steps.split.outputs.chunks}}", &job, None).unwrap();
        assert_eq!(resolved, "s3://bucket/chunk.wav");
    }

    #[test]
    fn test_unknown_step_reference_errors() {
        let job = job_with_outputs();
        let err = resolve_template("{{steps.ghost.outputs.x}}", &job, None).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownStep { .. }));
    }

    #[test]
    fn test_unknown_output_errors() {
        let job = job_with_outputs();
        let err = resolve_template("{{steps.split.outputs.missing}}", &job, None).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownOutput { .. }));
    }

    #[test]
    fn test_unknown_identifier_passes_through() {
        let job = job_with_outputs();
        let resolved = resolve_template("-i {{input_audio}}", &job, None).unwrap();
        assert_eq!(resolved, "-i {{input_audio}}");
    }

    #[test]
    fn test_unterminated_placeholder_is_malformed() {
        let job = job_with_outputs();
        let err = resolve_template("{{job_id", &job, None).unwrap_err();
        assert!(matches!(err, TemplateError::Malformed { .. }));
    }

    #[test]
    fn test_resolve_command_spec() {
        let spec = CommandSpec::new("ffmpeg")
            .with_flag("-i", serde_json::json!("{{input_audio}}"))
            .with_flag("-ar", serde_json::json!(44100))
            .with_arg("{{output_audio}}");

        let inputs = BTreeMap::from([(
            "input_audio".to_string(),
            serde_json::json!("/tmp/in.wav"),
        )]);
        let outputs = BTreeMap::from([("output_audio".to_string(), "/tmp/out.wav".to_string())]);

        let resolved = resolve_command_spec(&spec, &inputs, &outputs);
        assert_eq!(resolved.flags["-i"], serde_json::json!("/tmp/in.wav"));
        assert_eq!(resolved.flags["-ar"], serde_json::json!(44100));
        assert_eq!(resolved.args[0], "/tmp/out.wav");
    }

    #[test]
    fn test_resolve_command_spec_inputs_win_over_outputs() {
        let spec = CommandSpec::new("sox").with_arg("{{audio}}");
        let inputs = BTreeMap::from([("audio".to_string(), serde_json::json!("from-input"))]);
        let outputs = BTreeMap::from([("audio".to_string(), "from-output".to_string())]);

        let resolved = resolve_command_spec(&spec, &inputs, &outputs);
        assert_eq!(resolved.args[0], "from-input");
    }

    #[test]
    fn test_resolve_outputs() {
        let job = job_with_outputs();
        let step = job.step("split").unwrap();
        let outputs = resolve_outputs(step, &job).unwrap();
        assert_eq!(
            outputs["chunks"],
            "flucoma_service_fluid-noveltyslice_split/chunk.wav"
        );
    }
}
