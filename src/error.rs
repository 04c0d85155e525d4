use crate::db::StoreError;
use crate::models::job::{InvalidTransition, JobId, JobStatus};

/// Errors returned synchronously by orchestrator operations.
///
/// Processor failures, timeouts and stalls never show up here: they are
/// recorded on the job as `failed` with a [`FailureReason`](crate::models::job::FailureReason).
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("job {id} is {status}, expected {expected}")]
    InvalidState {
        id: JobId,
        status: JobStatus,
        expected: JobStatus,
    },

    #[error("job {id} has used {attempts} of {max_attempts} attempts")]
    RetryExhausted {
        id: JobId,
        attempts: i32,
        max_attempts: i32,
    },

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
