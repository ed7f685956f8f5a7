//! Retry with resume.
//!
//! The resume point is the earliest failed step in declared order. The
//! reset set is that step plus everything that transitively depends on
//! it; completed upstream steps are preserved and their outputs remain
//! the source bindings for the reset downstream steps.

use crate::core::{Job, JobStatus, Step};
use std::collections::HashSet;

/// The computed reset for one retry request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPlan {
    /// The earliest failed step; execution resumes here.
    pub resume_step: String,
    /// The full reset set (resume step + transitive dependents), in
    /// declared order.
    pub reset_steps: Vec<String>,
}

/// Finds the earliest failed step in declared order.
#[must_use]
pub fn resume_point(job: &Job) -> Option<&Step> {
    job.steps.iter().find(|s| s.is_failed())
}

/// Computes the reset plan for a failed job.
///
/// Returns `None` when no step is failed.
#[must_use]
pub fn compute_retry_plan(job: &Job) -> Option<RetryPlan> {
    let resume = resume_point(job)?;
    let reset = dependency_closure(job, &resume.name);
    Some(RetryPlan {
        resume_step: resume.name.clone(),
        reset_steps: reset,
    })
}

/// The named step plus every transitive dependent, in declared order.
#[must_use]
pub fn dependency_closure(job: &Job, root: &str) -> Vec<String> {
    let mut members: HashSet<&str> = HashSet::new();
    members.insert(root);

    // Transitions always point forward in declared order, so one pass in
    // that order reaches the full closure.
    for step in &job.steps {
        if members.contains(step.name.as_str()) {
            continue;
        }
        let depends_on_member = job
            .transitions_into(&step.name)
            .iter()
            .any(|t| members.contains(t.from.as_str()));
        if depends_on_member {
            members.insert(step.name.as_str());
        }
    }

    job.steps
        .iter()
        .filter(|s| members.contains(s.name.as_str()))
        .map(|s| s.name.clone())
        .collect()
}

/// Applies a retry plan to the job document: collapses every reset step
/// back to a single pending instance (clearing resolved inputs, outputs,
/// errors, and cache keys), records the resume cursor, bumps the retry
/// generation, and moves the job to `retrying`.
pub fn apply_retry_plan(job: &mut Job, plan: &RetryPlan) {
    for name in &plan.reset_steps {
        if let Some(step) = job.step_mut(name) {
            step.collapse_instances();
        }
    }
    job.resume_cursor = job.step_index(&plan.resume_step);
    job.retry_generation += 1;
    job.status = JobStatus::Retrying;
}
