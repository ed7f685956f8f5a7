//! Engine observability events.
//!
//! The engine narrates every job and step transition as a typed
//! [`EngineEvent`] delivered through an injected [`EventSink`], so hosts
//! can wire logging, metrics, or test capture without touching the
//! orchestration path.

mod sink;

pub use sink::{CollectingEventSink, EngineEvent, EventSink, NoOpEventSink, TracingEventSink};
