//! Canned manifests and pipeline builders.

use crate::core::{CommandSpec, Step, Transition};
use crate::manifest::{
    InputDescriptor, ManifestRegistry, OperationSpec, OutputDescriptor, ParamDescriptor,
    ParamKind, ServiceManifest,
};
use crate::orchestrator::SubmitRequest;
use std::sync::Arc;

/// A registry with the worker services the tests pipeline against.
///
/// - `librosa_service`: `normalize` (audio -> normalized, deterministic)
/// - `flucoma_service`: `noveltyslice` (audio -> chunks collection),
///   `mfcc` (audio -> features)
/// - `essentia_service`: `aggregate` (features collection -> report)
#[must_use]
pub fn audio_registry() -> Arc<ManifestRegistry> {
    let registry = ManifestRegistry::new();

    registry.register(
        ServiceManifest::new("librosa_service").with_operation(
            OperationSpec::new("normalize")
                .with_input(InputDescriptor::single("audio"))
                .with_output(OutputDescriptor::single("normalized"))
                .with_param(ParamDescriptor::new(
                    "target_db",
                    ParamKind::Float {
                        min: Some(-60.0),
                        max: Some(0.0),
                    },
                ))
                .deterministic(3600)
                .with_timeout(120),
        ),
    );

    registry.register(
        ServiceManifest::new("flucoma_service")
            .with_operation(
                OperationSpec::new("noveltyslice")
                    .with_input(InputDescriptor::single("audio"))
                    .with_output(OutputDescriptor::collection("chunks"))
                    .with_timeout(300),
            )
            .with_operation(
                OperationSpec::new("mfcc")
                    .with_input(InputDescriptor::single("audio"))
                    .with_output(OutputDescriptor::single("features"))
                    .with_timeout(120),
            ),
    );

    registry.register(
        ServiceManifest::new("essentia_service").with_operation(
            OperationSpec::new("aggregate")
                .with_input(InputDescriptor::collection("features"))
                .with_output(OutputDescriptor::single("report"))
                .with_timeout(60),
        ),
    );

    Arc::new(registry)
}

/// A single normalize step with a literal input.
#[must_use]
pub fn single_step_request(user_id: &str) -> SubmitRequest {
    let step = Step::new(
        "normalize",
        "librosa_service",
        "normalize",
        CommandSpec::new("sox")
            .with_flag("-i", serde_json::json!("{{audio}}"))
            .with_arg("{{normalized}}"),
    )
    .with_input("audio", "file:///uploads/{{user_id}}/in.wav")
    .with_output("normalized", "{{composite_name}}/out.wav")
    .with_parameter("target_db", serde_json::json!(-14.0));

    SubmitRequest {
        user_id: user_id.to_string(),
        steps: vec![step],
        transitions: vec![],
    }
}

/// A two-step chain: normalize feeds mfcc.
#[must_use]
pub fn chain_request(user_id: &str) -> SubmitRequest {
    let normalize = Step::new(
        "normalize",
        "librosa_service",
        "normalize",
        CommandSpec::new("sox"),
    )
    .with_input("audio", "file:///in.wav")
    .with_output("normalized", "normalize/out.wav")
    .with_parameter("target_db", serde_json::json!(-14.0));

    let mfcc = Step::new("mfcc", "flucoma_service", "mfcc", CommandSpec::new("fluid-mfcc"))
        .with_output("features", "mfcc/features.json");

    SubmitRequest {
        user_id: user_id.to_string(),
        steps: vec![normalize, mfcc],
        transitions: vec![
            Transition::new("normalize", "mfcc").with_mapping("normalized", "audio"),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::validate_pipeline;

    #[test]
    fn test_fixture_pipelines_validate() {
        let registry = audio_registry();

        let single = single_step_request("u");
        assert!(validate_pipeline(&single.steps, &single.transitions, &registry).is_ok());

        let chain = chain_request("u");
        assert!(validate_pipeline(&chain.steps, &chain.transitions, &registry).is_ok());
    }
}
