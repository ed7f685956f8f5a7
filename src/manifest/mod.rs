//! Service manifests: what each worker service can do.
//!
//! A manifest declares the operations a service supports, the typed
//! parameters each operation accepts, the inputs and outputs it works
//! with (including collection markers that drive fan-out and fan-in),
//! determinism for caching, and per-operation timeouts.

mod descriptor;
mod registry;

pub use descriptor::{
    Cardinality, InputDescriptor, OperationSpec, OutputDescriptor, ParamDescriptor, ParamKind,
    ServiceManifest,
};
pub use registry::ManifestRegistry;
