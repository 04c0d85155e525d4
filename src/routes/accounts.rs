use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::api::{CredentialsRequest, RegisterResponse, TokenResponse};
use crate::routes::error::ApiResult;

/// POST /api/v1/auth/register: create a non-admin account.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    req.validate()?;
    let user = state.accounts.register(&req.username, &req.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id,
            username: user.username,
        }),
    ))
}

/// POST /api/v1/auth/login: exchange credentials for a bearer token.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> ApiResult<Json<TokenResponse>> {
    req.validate()?;
    let issued = state.accounts.login(&req.username, &req.password).await?;
    Ok(Json(TokenResponse {
        access_token: issued.token,
        token_type: "Bearer".to_string(),
        expires_in: issued.expires_in.as_secs(),
    }))
}
