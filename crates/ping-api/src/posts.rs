use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use ping_sync::Session;
use ping_types::api::{
    AddCommentRequest, CommentsResponse, CreatePostRequest, FeedResponse, ToggleLikeResponse,
};

use crate::auth::AppState;
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<usize>,
}

/// GET /feed: the viewer's and their friends' posts, newest first.
pub async fn feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<FeedResponse>> {
    let feed = &state.services.feed;
    let audience = feed.compute_audience(session.user_id).await?;
    let posts = feed
        .fetch_feed(&session, &audience, Some(query.limit.unwrap_or(state.feed_limit)))
        .await?;
    Ok(Json(FeedResponse { posts }))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<CreatePostRequest>,
) -> ApiResult<impl IntoResponse> {
    let post = state.services.feed.create_post(&session, &req.text).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<StatusCode> {
    state.services.feed.delete_post(&session, post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<ToggleLikeResponse>> {
    let outcome = state.services.feed.toggle_like(&session, post_id).await?;
    Ok(Json(ToggleLikeResponse {
        liked: outcome.liked,
        like_count: outcome.like_count,
    }))
}

pub async fn comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(_session): Extension<Session>,
) -> ApiResult<Json<CommentsResponse>> {
    let comments = state.services.feed.comments(post_id).await?;
    Ok(Json(CommentsResponse { comments }))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(session): Extension<Session>,
    Json(req): Json<AddCommentRequest>,
) -> ApiResult<impl IntoResponse> {
    let comment = state
        .services
        .feed
        .add_comment(&session, post_id, &req.text)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}
