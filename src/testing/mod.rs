//! Test fixtures and mocks.
//!
//! Shared building blocks for exercising the engine: canned service
//! manifests, pipeline builders for common shapes, and a scripted worker
//! that drains a service queue and reports outcomes like a real one.

mod fixtures;
mod mocks;

pub use fixtures::{audio_registry, chain_request, single_step_request};
pub use mocks::{MockWorker, WorkerBehavior};
