use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::error::SyncResult;
use crate::identity::IdentityResolver;

/// The signed-in user, passed explicitly to every operation that acts on
/// someone's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated(Session),
}

impl AuthState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

/// Process-side auth state for an embedding client. Observers can watch the
/// state instead of polling a global.
#[derive(Clone)]
pub struct SessionHolder {
    identity: IdentityResolver,
    state: Arc<watch::Sender<AuthState>>,
}

impl SessionHolder {
    pub fn new(identity: IdentityResolver) -> Self {
        let (state, _) = watch::channel(AuthState::Unauthenticated);
        Self {
            identity,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn current(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> SyncResult<Session> {
        self.state.send_replace(AuthState::Authenticating);

        match self.identity.sign_in(email, password).await {
            Ok(session) => {
                self.state.send_replace(AuthState::Authenticated(session.clone()));
                Ok(session)
            }
            Err(e) => {
                self.state.send_replace(AuthState::Unauthenticated);
                Err(e)
            }
        }
    }

    pub fn sign_out(&self) {
        let previous = self.state.send_replace(AuthState::Unauthenticated);
        if let Some(session) = previous.session() {
            info!("{} signed out", session.user_id);
        }
    }
}
