use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::JobError;
use crate::services::accounts::AccountError;
use crate::services::storage::StorageError;

/// Error type for HTTP handlers, rendered as `{"error": .., "code": ..}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Account(#[from] AccountError),

    /// Missing or invalid bearer token.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMedia(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        ApiError::Job(JobError::Validation(report.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Job(err) => match err {
                JobError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                JobError::InvalidState { .. } => {
                    (StatusCode::CONFLICT, "INVALID_STATE", err.to_string())
                }
                JobError::RetryExhausted { .. } => {
                    (StatusCode::CONFLICT, "RETRY_EXHAUSTED", err.to_string())
                }
                JobError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
                JobError::Unauthorized(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
                JobError::InvalidTransition(_) | JobError::Store(_) => {
                    tracing::error!(error = %err, "Internal job error");
                    internal()
                }
            },
            ApiError::Storage(StorageError::NotFound(key)) => {
                tracing::error!(key = %key, "Result artifact missing from storage");
                internal()
            }
            ApiError::Storage(err) => {
                tracing::error!(error = %err, "Storage error");
                internal()
            }
            ApiError::Account(err) => match err {
                AccountError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                AccountError::UsernameTaken(_) => {
                    (StatusCode::CONFLICT, "USERNAME_TAKEN", err.to_string())
                }
                AccountError::InvalidCredentials => {
                    (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", err.to_string())
                }
                AccountError::Hash(_) | AccountError::Token(_) | AccountError::Store(_) => {
                    tracing::error!(error = %err, "Internal account error");
                    internal()
                }
            },
            ApiError::Unauthenticated(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::UnsupportedMedia(msg) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_MEDIA_TYPE",
                msg.clone(),
            ),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;
    use uuid::Uuid;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_job_errors_map_to_status_codes() {
        let id = Uuid::new_v4();
        assert_eq!(
            status_of(JobError::Validation("prompt is required".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(JobError::InvalidState {
                id,
                status: JobStatus::Completed,
                expected: JobStatus::Failed,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(JobError::RetryExhausted {
                id,
                attempts: 3,
                max_attempts: 3,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(JobError::NotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(JobError::Unauthorized("not yours".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(ApiError::Unauthenticated("missing token".into())),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_account_errors_map_to_status_codes() {
        assert_eq!(
            status_of(AccountError::UsernameTaken("alice".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AccountError::InvalidCredentials),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(AccountError::Validation("password too short".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(AccountError::Hash("bad salt".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_storage_errors_are_opaque() {
        assert_eq!(
            status_of(StorageError::NotFound("results/x.png".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
