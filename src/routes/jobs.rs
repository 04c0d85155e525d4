use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{
    AdminListQuery, JobListResponse, JobStatusResponse, JobSummary, ListQuery,
    ResultPendingResponse, SubmitRequest, SubmitResponse,
};
use crate::models::job::{JobInput, JobKind, JobStatus};
use crate::routes::error::ApiResult;
use crate::services::access::Principal;
use crate::services::jobs::ResultState;
use crate::services::storage::content_type_for;

fn parse_kind(kind: Option<&str>) -> ApiResult<Option<JobKind>> {
    Ok(kind.map(|k| k.parse::<JobKind>()).transpose()?)
}

/// POST /api/v1/jobs: queue a generation job.
pub async fn submit_job(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    req.validate()?;
    let kind: JobKind = req.kind.parse()?;
    let input = JobInput {
        prompt: req.prompt,
        source_ref: req.source_ref,
    };

    let job = state.jobs.submit(kind, input, &principal).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            status: job.status,
            attempt_count: job.attempt_count,
            message: format!("{kind} job queued"),
        }),
    ))
}

/// GET /api/v1/jobs/{id}/status
pub async fn get_job_status(
    State(state): State<AppState>,
    principal: Principal,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = state.jobs.get_status(job_id, &principal).await?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// GET /api/v1/jobs/{id}/result: artifact bytes once completed.
pub async fn get_job_result(
    State(state): State<AppState>,
    principal: Principal,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    let response = match state.jobs.get_result(job_id, &principal).await? {
        ResultState::Ready(key) => {
            let bytes = state.storage.get(&key).await?;
            ([(header::CONTENT_TYPE, content_type_for(&key))], bytes).into_response()
        }
        ResultState::Pending(status) => (
            StatusCode::ACCEPTED,
            Json(ResultPendingResponse {
                job_id,
                status,
                message: "Result not ready yet".to_string(),
                error: None,
            }),
        )
            .into_response(),
        ResultState::Failed { error, reason } => (
            StatusCode::CONFLICT,
            Json(ResultPendingResponse {
                job_id,
                status: JobStatus::Failed,
                message: match reason {
                    Some(reason) => format!("Job failed ({reason})"),
                    None => "Job failed".to_string(),
                },
                error: Some(error),
            }),
        )
            .into_response(),
    };
    Ok(response)
}

/// POST /api/v1/jobs/{id}/retry
pub async fn retry_job(
    State(state): State<AppState>,
    principal: Principal,
    Path(job_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let job = state.jobs.retry(job_id, &principal).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            status: job.status,
            attempt_count: job.attempt_count,
            message: format!("Job requeued (attempt {})", job.attempt_count),
        }),
    ))
}

/// GET /api/v1/jobs?type=
///
/// The caller's jobs, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let kind = parse_kind(query.kind.as_deref())?;
    let jobs = state.jobs.list(&principal, kind).await?;
    Ok(Json(JobListResponse {
        jobs: jobs.iter().map(JobSummary::from).collect(),
    }))
}

/// GET /api/v1/admin/jobs?type=&status=
pub async fn list_all_jobs(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<AdminListQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let kind = parse_kind(query.kind.as_deref())?;
    let jobs = state.jobs.list_all(&principal, kind, query.status).await?;
    Ok(Json(JobListResponse {
        jobs: jobs.iter().map(JobSummary::from).collect(),
    }))
}
