//! REST surface of the Ping server.

pub mod auth;
pub mod chats;
pub mod error;
pub mod friends;
pub mod middleware;
pub mod posts;
pub mod users;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{delete, get, post, put},
};

use ping_sync::identity::MAX_PROFILE_IMAGE_SIZE;

use crate::auth::AppState;
use crate::middleware::require_auth;

/// All HTTP routes. Everything except registration and login needs a bearer token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    // Room for the largest accepted image plus a little slack so the
    // size check reports a validation error instead of a bare 413.
    let avatar_route = Router::new()
        .route("/users/me/avatar", put(users::upload_avatar))
        .layer(DefaultBodyLimit::max(MAX_PROFILE_IMAGE_SIZE + 1024));

    let protected_routes = Router::new()
        .route("/users/me", get(users::me).patch(users::update_me))
        .route("/users/by-ping-id/{ping_id}", get(users::by_ping_id))
        .route("/blobs/{blob_id}", get(users::blob))
        .route("/friends", get(friends::list).post(friends::add))
        .route(
            "/chats/{chat_id}/messages",
            get(chats::get_messages).post(chats::send_message),
        )
        .route("/chats/{chat_id}/read", post(chats::mark_read))
        .route("/feed", get(posts::feed))
        .route("/posts", post(posts::create_post))
        .route("/posts/{post_id}", delete(posts::delete_post))
        .route("/posts/{post_id}/likes", post(posts::toggle_like))
        .route(
            "/posts/{post_id}/comments",
            get(posts::comments).post(posts::add_comment),
        )
        .merge(avatar_route)
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
