use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use ping_sync::Session;
use ping_types::api::{MarkReadResponse, MessagesResponse, SendMessageRequest};

use crate::auth::AppState;
use crate::error::ApiResult;

/// Only the two participants encoded in the chat id may read or write.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<MessagesResponse>> {
    let messages = state.services.conversations.messages(&session, &chat_id).await?;
    Ok(Json(MessagesResponse { messages }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Extension(session): Extension<Session>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .services
        .conversations
        .send_message(&session, &chat_id, &req.text)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<MarkReadResponse>> {
    let marked = state.services.conversations.mark_read(&session, &chat_id).await?;
    Ok(Json(MarkReadResponse { marked }))
}
