use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod accounts;
pub mod auth;
pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod uploads;

/// Upload size cap for source images.
pub const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// The API router with its middleware stack. `/metrics` is mounted
/// separately by the server binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/auth/register", post(accounts::register))
        .route("/api/v1/auth/login", post(accounts::login))
        .route("/api/v1/uploads", post(uploads::upload_image))
        .route("/api/v1/jobs", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/api/v1/jobs/{id}/status", get(jobs::get_job_status))
        .route("/api/v1/jobs/{id}/result", get(jobs::get_job_result))
        .route("/api/v1/jobs/{id}/retry", post(jobs::retry_job))
        .route("/api/v1/admin/jobs", get(jobs::list_all_jobs))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
}
