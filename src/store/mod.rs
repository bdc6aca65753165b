//! Job and project persistence.

mod database;
mod schema;

pub use database::{JobFilter, JobStore, TransitionUpdate};
pub use schema::{Job, JobStatus, JobType, Project};

use thiserror::Error;
use uuid::Uuid;

/// Errors from the job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Project not found: {0}")]
    ProjectNotFound(Uuid),

    /// A guarded status update found the row in a different state than the
    /// transition requires. The row is unchanged.
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Database query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A stored row violates an invariant (bad UUID, bad status string,
    /// completed without output).
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
