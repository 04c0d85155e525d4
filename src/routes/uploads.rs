use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::UploadResponse;
use crate::routes::error::{ApiError, ApiResult};
use crate::services::access::Principal;
use crate::services::storage::upload_key;

/// POST /api/v1/uploads: store a source image for image-to-3D and
/// image-to-image jobs. Returns the `source_ref` to submit with.
pub async fn upload_image(
    State(state): State<AppState>,
    principal: Principal,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut image: Option<(Vec<u8>, image::ImageFormat)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("image") {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;

            // Validate image format using the `image` crate
            let format = image::guess_format(&data)
                .map_err(|_| ApiError::UnsupportedMedia("not a recognised image".into()))?;

            image = Some((data.to_vec(), format));
        }
    }

    let (data, format) =
        image.ok_or_else(|| ApiError::BadRequest("missing `image` field".into()))?;

    let key = upload_key(Uuid::new_v4());
    state
        .storage
        .put(&key, &data, format.to_mime_type())
        .await?;

    tracing::info!(
        source_ref = %key,
        owner = %principal.id,
        bytes = data.len(),
        "Source image uploaded"
    );

    Ok((StatusCode::CREATED, Json(UploadResponse { source_ref: key })))
}
