use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{FailureReason, Job, JobStatus};

/// Request to submit a generation job.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitRequest {
    /// Job type, e.g. `text_to_image` or `image_to_image:restyle`.
    #[serde(rename = "type")]
    #[garde(length(min = 1, max = 64))]
    pub kind: String,

    #[garde(skip)]
    pub prompt: Option<String>,

    /// Key returned by the upload endpoint.
    #[garde(skip)]
    pub source_ref: Option<String>,
}

/// Response after submitting (or retrying) a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub attempt_count: i32,
    pub message: String,
}

/// Response for querying job status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            created_at: job.created_at,
            completed_at: job.completed_at,
            attempt_count: job.attempt_count,
            error: job.error.clone(),
            failure_reason: job.failure_reason,
        }
    }
}

/// One row of a job listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: JobStatus,
    pub owner: String,
    pub prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt_count: i32,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind.to_string(),
            status: job.status,
            owner: job.owner.clone(),
            prompt: job.input.prompt.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at,
            attempt_count: job.attempt_count,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
}

/// Query string for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Query string for `GET /api/v1/admin/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct AdminListQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<JobStatus>,
}

/// Response for a pending or failed result fetch.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultPendingResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response after uploading a source image.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub source_ref: String,
}

/// Body for `POST /api/v1/auth/register` and `POST /api/v1/auth/login`.
#[derive(Debug, Deserialize, Validate)]
pub struct CredentialsRequest {
    #[garde(length(min = 3, max = 64))]
    pub username: String,

    #[garde(length(min = 1, max = 256))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}
