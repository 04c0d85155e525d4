//! Bearer token extractor for authenticated handlers.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::app_state::AppState;
use crate::routes::error::ApiError;
use crate::services::access::Principal;

impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthenticated("Missing Authorization header".into()))?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError::Unauthenticated(
                "Invalid Authorization format. Expected: Bearer <token>".into(),
            )
        })?;

        state.auth.verify(token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            ApiError::Unauthenticated("Invalid or expired token".into())
        })
    }
}
