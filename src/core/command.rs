//! Serializable command specifications.
//!
//! A `CommandSpec` is opaque to the engine: it is validated at submission,
//! stored on the step, and handed back - with placeholders substituted -
//! when a worker hydrates the step.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serializable representation of a shell command.
///
/// Flag values keep their submitted JSON types (string, number, bool) and
/// are stringified only when converted to an argv.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Base command or executable name.
    pub program: String,
    /// CLI flags, e.g. `{"-i": "{{input_audio}}", "-ar": 44100}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, serde_json::Value>,
    /// Ordered positional args.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Whether the worker should run the command through a shell.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shell: bool,
    /// Working directory for the worker process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Extra environment variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
}

impl CommandSpec {
    /// Creates a new command spec for the given program.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            flags: BTreeMap::new(),
            args: Vec::new(),
            shell: false,
            cwd: None,
            env: None,
        }
    }

    /// Adds a flag.
    #[must_use]
    pub fn with_flag(mut self, flag: impl Into<String>, value: serde_json::Value) -> Self {
        self.flags.insert(flag.into(), value);
        self
    }

    /// Adds a positional argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Converts into a subprocess argument list: program, flag pairs in
    /// flag order, then positional args.
    #[must_use]
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = vec![self.program.clone()];
        for (flag, value) in &self.flags {
            argv.push(flag.clone());
            argv.push(stringify_flag_value(value));
        }
        argv.extend(self.args.iter().cloned());
        argv
    }
}

fn stringify_flag_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_to_argv() {
        let spec = CommandSpec::new("ffmpeg")
            .with_flag("-i", serde_json::json!("input.wav"))
            .with_flag("-ar", serde_json::json!(44100))
            .with_arg("output.wav");

        let argv = spec.to_argv();
        assert_eq!(argv[0], "ffmpeg");
        assert!(argv.contains(&"-i".to_string()));
        assert!(argv.contains(&"44100".to_string()));
        assert_eq!(argv.last().unwrap(), "output.wav");
    }

    #[test]
    fn test_flag_order_is_stable() {
        let spec = CommandSpec::new("fluid-hpss")
            .with_flag("-source", serde_json::json!("a.wav"))
            .with_flag("-harmonic", serde_json::json!("h.wav"));

        // BTreeMap ordering: "-harmonic" before "-source"
        let argv = spec.to_argv();
        let h = argv.iter().position(|a| a == "-harmonic").unwrap();
        let s = argv.iter().position(|a| a == "-source").unwrap();
        assert!(h < s);
    }

    #[test]
    fn test_serialize_skips_empty() {
        let spec = CommandSpec::new("sox");
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"program":"sox"}"#);
    }

    #[test]
    fn test_round_trip() {
        let spec = CommandSpec::new("ffmpeg")
            .with_flag("-i", serde_json::json!("{{input_audio}}"))
            .with_arg("{{output_audio}}")
            .with_cwd("/tmp");

        let json = serde_json::to_string(&spec).unwrap();
        let back: CommandSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
