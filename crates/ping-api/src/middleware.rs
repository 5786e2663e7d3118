use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use ping_sync::Session;
use ping_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// Validate a bearer token and return its claims.
pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

/// Extract and validate JWT from Authorization header, then hand the
/// handler a [`Session`] for the token's user.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = verify_token(&state.jwt_secret, token).ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(Session {
        user_id: claims.sub,
        email: claims.email,
    });
    Ok(next.run(req).await)
}
