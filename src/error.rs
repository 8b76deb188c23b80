use thiserror::Error;

use crate::scheduler::JobState;

#[derive(Error, Debug)]
pub enum SchedError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Gantt conflict: moldable {moldable_id} overlaps moldable {other} on resource {resource_id}")]
    Conflict {
        moldable_id: u64,
        other: u64,
        resource_id: u64,
    },

    #[error("No current Gantt entry for moldable {0}")]
    NotFound(u64),

    #[error("Scheduling error for job {job_id}: {message}")]
    Scheduling { job_id: u64, message: String },

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: u64,
        from: JobState,
        to: JobState,
    },

    #[error("Job not found: {0}")]
    UnknownJob(u64),

    #[error("Resource not found: {0}")]
    UnknownResource(u64),

    #[error("Job store is full ({0} jobs)")]
    StoreFull(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedError {
    /// Errors that leave the Gantt table and the job store out of sync.
    /// A pass hitting one of these stops instead of carrying on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedError::Conflict { .. } | SchedError::NotFound(_) | SchedError::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedError>;
