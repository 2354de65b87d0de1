//! Job lifecycle errors.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::model::{JobId, JobStatus};
use crate::db::DatabaseError;

/// Errors raised by the lifecycle manager and the background runner.
///
/// The `Display` text of the runner-side variants (`InputMissing`,
/// `EngineFailure`, `Timeout`, `Unexpected`) is what ends up in a failed
/// job's `error` field.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} is already {status}")]
    AlreadyTerminal { id: JobId, status: JobStatus },

    /// The job is live but not in the required source state. A second
    /// `begin_processing` on a job that is already running lands here.
    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job id {0} already exists")]
    DuplicateId(JobId),

    #[error("File not found: {}", .0.display())]
    InputMissing(PathBuf),

    #[error("{0}")]
    EngineFailure(String),

    #[error("Transcription timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Job store failure: {0}")]
    Store(#[from] DatabaseError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl JobError {
    pub fn not_found(id: JobId) -> Self {
        JobError::NotFound(id.to_string())
    }
}
