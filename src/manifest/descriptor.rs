//! Manifest descriptor types.

use serde::{Deserialize, Serialize};

/// How many values an operation input accepts.
///
/// The cardinality is the explicit fan-out trigger: a collection-valued
/// binding flowing into a `Single` input materialises one instance per
/// element; flowing into a `Collection` input it becomes a fan-in join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Exactly one value per instance.
    Single,
    /// The ordered list of all producing instances' values.
    Collection,
}

impl Default for Cardinality {
    fn default() -> Self {
        Self::Single
    }
}

/// A declared operation input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDescriptor {
    /// Placeholder name.
    pub name: String,
    /// Single value or collection.
    #[serde(default)]
    pub cardinality: Cardinality,
}

impl InputDescriptor {
    /// Creates a single-valued input descriptor.
    #[must_use]
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::Single,
        }
    }

    /// Creates a collection-valued input descriptor.
    #[must_use]
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::Collection,
        }
    }
}

/// A declared operation output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    /// Placeholder name.
    pub name: String,
    /// True when the operation emits an indexed set of values under this
    /// placeholder (e.g. a splitter producing N chunks).
    #[serde(default)]
    pub collection: bool,
}

impl OutputDescriptor {
    /// Creates a scalar output descriptor.
    #[must_use]
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: false,
        }
    }

    /// Creates a collection output descriptor.
    #[must_use]
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: true,
        }
    }
}

/// The type and range constraints of an operation parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    /// Free-form string.
    String,
    /// Boolean flag.
    Bool,
    /// Integer with optional inclusive bounds.
    Int {
        /// Minimum allowed value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        /// Maximum allowed value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    /// Float with optional inclusive bounds.
    Float {
        /// Minimum allowed value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        /// Maximum allowed value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// One of a fixed set of strings.
    Choice {
        /// The allowed values.
        choices: Vec<String>,
    },
}

/// A typed, range-checked operation parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    /// Parameter name.
    pub name: String,
    /// Type and range constraints.
    pub kind: ParamKind,
    /// Whether the parameter must be supplied.
    #[serde(default)]
    pub required: bool,
}

impl ParamDescriptor {
    /// Creates an optional parameter descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    /// Marks the parameter as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Checks a submitted value against the descriptor.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the violation.
    pub fn check(&self, value: &serde_json::Value) -> Result<(), String> {
        match &self.kind {
            ParamKind::String => {
                if !value.is_string() {
                    return Err(format!("'{}' must be a string", self.name));
                }
            }
            ParamKind::Bool => {
                if !value.is_boolean() {
                    return Err(format!("'{}' must be a boolean", self.name));
                }
            }
            ParamKind::Int { min, max } => {
                let Some(n) = value.as_i64() else {
                    return Err(format!("'{}' must be an integer", self.name));
                };
                if let Some(min) = min {
                    if n < *min {
                        return Err(format!("'{}' must be >= {min}, got {n}", self.name));
                    }
                }
                if let Some(max) = max {
                    if n > *max {
                        return Err(format!("'{}' must be <= {max}, got {n}", self.name));
                    }
                }
            }
            ParamKind::Float { min, max } => {
                let Some(n) = value.as_f64() else {
                    return Err(format!("'{}' must be a number", self.name));
                };
                if let Some(min) = min {
                    if n < *min {
                        return Err(format!("'{}' must be >= {min}, got {n}", self.name));
                    }
                }
                if let Some(max) = max {
                    if n > *max {
                        return Err(format!("'{}' must be <= {max}, got {n}", self.name));
                    }
                }
            }
            ParamKind::Choice { choices } => {
                let Some(s) = value.as_str() else {
                    return Err(format!("'{}' must be a string choice", self.name));
                };
                if !choices.iter().any(|c| c == s) {
                    return Err(format!(
                        "'{}' must be one of [{}], got '{s}'",
                        self.name,
                        choices.join(", ")
                    ));
                }
            }
        }
        Ok(())
    }
}

/// One operation a worker service supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    /// Operation key, referenced by `Step::operation`.
    pub name: String,
    /// Declared inputs.
    #[serde(default)]
    pub inputs: Vec<InputDescriptor>,
    /// Declared outputs.
    #[serde(default)]
    pub outputs: Vec<OutputDescriptor>,
    /// Declared parameters.
    #[serde(default)]
    pub params: Vec<ParamDescriptor>,
    /// True when identical inputs always produce identical outputs, so
    /// results may be served from the cache index.
    #[serde(default)]
    pub deterministic: bool,
    /// Cache TTL in seconds for deterministic results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,
    /// Per-operation execution timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl OperationSpec {
    /// Creates a new operation spec.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: Vec::new(),
            deterministic: false,
            cache_ttl_secs: None,
            timeout_secs: None,
        }
    }

    /// Adds an input descriptor.
    #[must_use]
    pub fn with_input(mut self, input: InputDescriptor) -> Self {
        self.inputs.push(input);
        self
    }

    /// Adds an output descriptor.
    #[must_use]
    pub fn with_output(mut self, output: OutputDescriptor) -> Self {
        self.outputs.push(output);
        self
    }

    /// Adds a parameter descriptor.
    #[must_use]
    pub fn with_param(mut self, param: ParamDescriptor) -> Self {
        self.params.push(param);
        self
    }

    /// Marks the operation deterministic with the given cache TTL.
    #[must_use]
    pub fn deterministic(mut self, cache_ttl_secs: u64) -> Self {
        self.deterministic = true;
        self.cache_ttl_secs = Some(cache_ttl_secs);
        self
    }

    /// Sets the execution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Looks up an input descriptor by name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&InputDescriptor> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Looks up an output descriptor by name.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&OutputDescriptor> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Looks up a parameter descriptor by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamDescriptor> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Everything one worker service advertises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceManifest {
    /// Service name, matched against `Step::service`.
    pub service: String,
    /// Supported operations.
    pub operations: Vec<OperationSpec>,
}

impl ServiceManifest {
    /// Creates an empty manifest for a service.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operations: Vec::new(),
        }
    }

    /// Adds an operation.
    #[must_use]
    pub fn with_operation(mut self, op: OperationSpec) -> Self {
        self.operations.push(op);
        self
    }

    /// Looks up an operation by name.
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&OperationSpec> {
        self.operations.iter().find(|o| o.name == name)
    }
}
