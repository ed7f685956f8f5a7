//! In-memory job store backed by a concurrent map.

use super::{JobMutation, JobStore};
use crate::core::{Job, JobStatus};
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// An in-memory `JobStore`.
///
/// Per-job serialisation comes from the map's per-entry locking: a
/// mutation holds the entry for the duration of the closure.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: DashMap<Uuid, Job>,
}

impl MemoryJobStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        let job_id = job.job_id;
        match self.jobs.entry(job_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Backend(format!(
                "job {job_id} already exists"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(job);
                Ok(())
            }
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.get(&job_id).map(|entry| entry.clone()))
    }

    async fn mutate(&self, job_id: Uuid, mutation: JobMutation) -> Result<Job, StoreError> {
        let mut entry = self
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound { job_id })?;
        mutation(entry.value_mut());
        entry.touch();
        Ok(entry.clone())
    }

    async fn compare_and_set_status(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        new: JobStatus,
    ) -> Result<bool, StoreError> {
        let mut entry = self
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound { job_id })?;
        if entry.status != expected {
            return Ok(false);
        }
        entry.status = new;
        entry.touch();
        Ok(true)
    }

    async fn active_jobs(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .jobs
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| entry.job_id)
            .collect())
    }
}
