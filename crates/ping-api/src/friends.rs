use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};

use ping_sync::Session;
use ping_types::api::{AddFriendRequest, AddFriendResponse, FriendsResponse};

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn list(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<FriendsResponse>> {
    let friends = state.services.friends.list_friends(session.user_id).await?;
    Ok(Json(FriendsResponse { friends }))
}

pub async fn add(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<AddFriendRequest>,
) -> ApiResult<impl IntoResponse> {
    let chat_id = state.services.friends.add_friend(&session, req.friend_id).await?;
    Ok((StatusCode::CREATED, Json(AddFriendResponse { chat_id })))
}
