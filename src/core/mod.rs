//! Core domain model types for waveflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Job and step status enums
//! - The job document, its steps and instances, and transitions
//! - Command specifications passed through to workers
//! - Thin queue message shapes and the structured step error object

mod command;
mod error_obj;
mod job;
mod message;
mod status;
mod step;
mod transition;

pub use command::CommandSpec;
pub use error_obj::{codes, ErrorType, StepError};
pub use job::Job;
pub use message::{
    join_counter_key, service_queue_name, StepDispatchMessage, StepStatusMessage, STATUS_QUEUE,
};
pub use status::{JobStatus, Outcome, StepStatus};
pub use step::{Step, StepInstance};
pub use transition::Transition;
