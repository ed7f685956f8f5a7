//! Durable job document storage.
//!
//! The store is the single source of truth for pipeline state. Mutations
//! to a job document are serialised per job; unrelated jobs proceed
//! independently. The terminal overall-status transition goes through an
//! explicit compare-and-set so concurrent status consumers cannot race.

mod memory;

pub use memory::MemoryJobStore;

use crate::core::{Job, JobStatus};
use crate::errors::StoreError;
use async_trait::async_trait;
use uuid::Uuid;

/// A closure applied atomically to a job document.
pub type JobMutation = Box<dyn FnOnce(&mut Job) + Send>;

/// Durable mapping of job id to job document.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new job document.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if a document with the same id
    /// already exists.
    async fn insert(&self, job: Job) -> Result<(), StoreError>;

    /// Fetches a read-only snapshot of a job document.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Applies a mutation to the job document atomically and returns the
    /// updated snapshot. The `updated_at` timestamp is bumped.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the job does not exist.
    async fn mutate(&self, job_id: Uuid, mutation: JobMutation) -> Result<Job, StoreError>;

    /// Transitions the overall status iff it currently equals `expected`.
    ///
    /// Returns true when the transition was applied. Used to guard the
    /// at-most-once terminal transition per retry generation.
    async fn compare_and_set_status(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        new: JobStatus,
    ) -> Result<bool, StoreError>;

    /// Ids of jobs that are not terminal (pending, processing, or
    /// retrying). The timeout sweeper scans these.
    async fn active_jobs(&self) -> Result<Vec<Uuid>, StoreError>;
}
