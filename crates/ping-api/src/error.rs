use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use ping_sync::SyncError;

/// Failure of an HTTP handler. Rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("missing or invalid token")]
    Unauthorized,

    #[error("token could not be issued: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Sync(e) => match e {
                SyncError::DuplicateIdentifier(_) | SyncError::EmailInUse(_) => StatusCode::CONFLICT,
                SyncError::InvalidPingId(_) | SyncError::Validation { .. } | SyncError::CannotAddSelf => {
                    StatusCode::BAD_REQUEST
                }
                SyncError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                SyncError::NotParticipant(_) | SyncError::NotAuthor(_) => StatusCode::FORBIDDEN,
                SyncError::NotFound(_) => StatusCode::NOT_FOUND,
                SyncError::ProfileMissing(_) | SyncError::Backend(_) | SyncError::Subscription(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Token(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the log.
        let message = if status.is_server_error() {
            error!("Request failed: {}", self);
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn sync_errors_map_to_statuses() {
        let cases = [
            (SyncError::DuplicateIdentifier("alice01".into()), StatusCode::CONFLICT),
            (SyncError::EmailInUse("a@example.com".into()), StatusCode::CONFLICT),
            (SyncError::InvalidPingId("too short"), StatusCode::BAD_REQUEST),
            (SyncError::CannotAddSelf, StatusCode::BAD_REQUEST),
            (SyncError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (SyncError::NotAuthor(Uuid::new_v4()), StatusCode::FORBIDDEN),
            (SyncError::NotFound("post".into()), StatusCode::NOT_FOUND),
            (SyncError::Backend(anyhow::anyhow!("disk full")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
