//! # Waveflow
//!
//! A job orchestration engine for multi-step audio-processing pipelines.
//!
//! Waveflow takes a submitted pipeline - a directed graph of computation
//! steps, each naming a worker service, a command template, input and
//! output placeholders, and edges routing one step's outputs into another
//! step's inputs - and drives it to completion:
//!
//! - **Validation**: submitted pipelines are checked against service
//!   manifests before anything is persisted
//! - **Durable state**: the job document in the [`store`] is the single
//!   source of truth; queue messages carry identifiers only
//! - **Planning**: a pure planner computes ready/blocked/done sets,
//!   materialises fan-out instances, and resolves fan-in joins
//! - **Dispatch**: ready steps go to per-service queues, with
//!   deterministic-result caching short-circuiting repeat work
//! - **Status consumption**: a pool of consumers drains worker outcome
//!   reports and advances the graph
//! - **Retry with resume**: failed jobs resume from the earliest failed
//!   step, preserving completed upstream work
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use waveflow::prelude::*;
//!
//! let engine = Orchestrator::in_memory(registry, EngineConfig::default());
//! let job_id = engine.submit(pipeline).await?;
//! engine.start();
//!
//! // Workers pop `<service>_queue`, call hydrate(), and report back on
//! // the status queue; poll the job until it is terminal.
//! let job = engine.get(job_id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod bus;
pub mod cache;
pub mod config;
pub mod consumer;
pub mod core;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod manifest;
pub mod orchestrator;
pub mod planner;
pub mod retry;
pub mod store;
pub mod template;
pub mod testing;
pub mod utils;
pub mod validator;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bus::{MemoryQueueBus, QueueBus};
    pub use crate::cache::{CacheEntry, CacheIndex, MemoryCacheIndex};
    pub use crate::config::EngineConfig;
    pub use crate::core::{
        CommandSpec, ErrorType, Job, JobStatus, Outcome, Step, StepDispatchMessage,
        StepError, StepInstance, StepStatus, StepStatusMessage, Transition,
    };
    pub use crate::errors::{
        PipelineValidationError, ValidationErrorInfo, WaveflowError,
    };
    pub use crate::events::{
        CollectingEventSink, EngineEvent, EventSink, NoOpEventSink, TracingEventSink,
    };
    pub use crate::manifest::{
        Cardinality, InputDescriptor, ManifestRegistry, OperationSpec, OutputDescriptor,
        ParamDescriptor, ParamKind, ServiceManifest,
    };
    pub use crate::orchestrator::{HydratedStep, Orchestrator, RetryReceipt, SubmitRequest};
    pub use crate::store::{JobStore, MemoryJobStore};
    pub use crate::utils::{generate_uuid, iso_timestamp, now_utc, Timestamp};
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::errors::WaveflowError;
    use crate::manifest::ManifestRegistry;
    use crate::orchestrator::Orchestrator;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_engine_smoke() {
        // A fresh engine over in-memory backends holds no jobs and
        // rejects lookups for ids it never issued.
        let engine = Orchestrator::in_memory(
            Arc::new(ManifestRegistry::new()),
            EngineConfig::default(),
        );

        let missing = engine.get(crate::utils::generate_uuid()).await;
        assert!(matches!(missing, Err(WaveflowError::JobNotFound { .. })));
    }
}
