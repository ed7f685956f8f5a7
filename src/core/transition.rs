//! Transitions: typed edges routing producer outputs into consumer inputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A directed edge between two steps with a named output-to-input mapping.
///
/// When the producer completes, each named output is assigned to the named
/// input of the consumer. Multiple transitions may target the same
/// consumer; a consumer is ready only when every declared input is bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Name of the producing step.
    #[serde(rename = "from_step_name")]
    pub from: String,
    /// Name of the consuming step.
    #[serde(rename = "to_step_name")]
    pub to: String,
    /// Producer output placeholder -> consumer input placeholder.
    #[serde(rename = "output_to_input_mapping", default)]
    pub mapping: BTreeMap<String, String>,
}

impl Transition {
    /// Creates a transition with an empty mapping.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            mapping: BTreeMap::new(),
        }
    }

    /// Maps a producer output onto a consumer input.
    #[must_use]
    pub fn with_mapping(
        mut self,
        producer_output: impl Into<String>,
        consumer_input: impl Into<String>,
    ) -> Self {
        self.mapping
            .insert(producer_output.into(), consumer_input.into());
        self
    }

    /// Returns the consumer input a producer output feeds, if mapped.
    #[must_use]
    pub fn input_for_output(&self, producer_output: &str) -> Option<&str> {
        self.mapping.get(producer_output).map(String::as_str)
    }

    /// Returns true if this transition binds the given consumer input.
    #[must_use]
    pub fn binds_input(&self, consumer_input: &str) -> bool {
        self.mapping.values().any(|v| v == consumer_input)
    }
}
