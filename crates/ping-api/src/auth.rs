use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use ping_sync::Services;
use ping_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiResult;

/// Sessions issued over HTTP last this long.
pub const TOKEN_TTL_DAYS: i64 = 30;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub services: Services,
    pub jwt_secret: String,
    /// Feed size when a request does not ask for one.
    pub feed_limit: usize,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let identity = &state.services.identity;
    let user_id = identity
        .register_user(&req.email, &req.password, &req.display_name, &req.ping_id)
        .await?;

    let user = identity.get_profile(user_id).await?;
    let token = create_token(&state.jwt_secret, user_id, &user.email)?;

    info!("Registered {} as {}", user.ping_id, user_id);
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let identity = &state.services.identity;
    let session = identity.sign_in(&req.email, &req.password).await?;
    let user = identity.get_profile(session.user_id).await?;

    let token = create_token(&state.jwt_secret, session.user_id, &session.email)?;

    Ok(Json(LoginResponse {
        user_id: session.user_id,
        display_name: user.display_name,
        ping_id: user.ping_id,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, email: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
