use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use uuid::Uuid;

use ping_sync::{Session, SyncError};
use ping_types::api::{ProfileResponse, UpdateProfileRequest};

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn me(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<ProfileResponse>> {
    let user = state.services.identity.get_profile(session.user_id).await?;
    Ok(Json(ProfileResponse { user }))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<ProfileResponse>> {
    let user = state
        .services
        .identity
        .update_profile(&session, req.display_name.as_deref())
        .await?;
    Ok(Json(ProfileResponse { user }))
}

/// PUT /users/me/avatar: raw image bytes in the body.
pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    bytes: Bytes,
) -> ApiResult<Json<ProfileResponse>> {
    let user = state
        .services
        .identity
        .upload_profile_image(&session, &bytes)
        .await?;
    Ok(Json(ProfileResponse { user }))
}

/// Exact, case-sensitive Ping ID lookup. Unknown ids are a 404.
pub async fn by_ping_id(
    State(state): State<AppState>,
    Path(ping_id): Path<String>,
    Extension(_session): Extension<Session>,
) -> ApiResult<Json<ProfileResponse>> {
    let user = state
        .services
        .identity
        .resolve_ping_id(&ping_id)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("ping id {:?}", ping_id)))?;
    Ok(Json(ProfileResponse { user }))
}

pub async fn blob(
    State(state): State<AppState>,
    Path(blob_id): Path<Uuid>,
    Extension(_session): Extension<Session>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state.services.identity.profile_image(blob_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}
