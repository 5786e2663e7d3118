use thiserror::Error;
use uuid::Uuid;

/// Every failure a sync operation can report to its caller.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("ping id {0:?} is already taken")]
    DuplicateIdentifier(String),

    #[error("email {0:?} is already registered")]
    EmailInUse(String),

    #[error("invalid ping id: {0}")]
    InvalidPingId(&'static str),

    #[error("invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: &'static str,
    },

    #[error("invalid email or password")]
    InvalidCredentials,

    /// Credential exists but the profile write never landed.
    #[error("account {0} has no profile")]
    ProfileMissing(Uuid),

    #[error("cannot add yourself as a friend")]
    CannotAddSelf,

    #[error("{0} not found")]
    NotFound(String),

    #[error("not a participant of conversation {0}")]
    NotParticipant(String),

    #[error("only the author can delete post {0}")]
    NotAuthor(Uuid),

    /// Any read or write against the backend failed. Never retried here.
    #[error("backend error: {0:#}")]
    Backend(#[from] anyhow::Error),

    /// A live query stopped; the owner has to reopen it.
    #[error("listen failed: {0}")]
    Subscription(String),
}

impl SyncError {
    pub(crate) fn validation(field: &'static str, reason: &'static str) -> Self {
        Self::Validation { field, reason }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
