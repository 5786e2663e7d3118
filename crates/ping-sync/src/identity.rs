use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use anyhow::anyhow;
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use ping_types::models::User;
use ping_types::paths::USERS;

use crate::backend::{Backend, decode_all};
use crate::error::{SyncError, SyncResult};
use crate::session::Session;

pub const MIN_PING_ID_LEN: usize = 4;
pub const MAX_PING_ID_LEN: usize = 32;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// 5 MB limit for profile images
pub const MAX_PROFILE_IMAGE_SIZE: usize = 5 * 1024 * 1024;

/// Registration, sign-in, Ping ID lookup and profile maintenance.
#[derive(Clone)]
pub struct IdentityResolver {
    backend: Backend,
}

impl IdentityResolver {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Create the credential, then the profile document keyed by its id.
    ///
    /// The Ping ID check is a plain read before the writes, so two concurrent
    /// registrations of the same id can both pass it. If the profile write
    /// fails the credential is deleted again.
    pub async fn register_user(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
        ping_id: &str,
    ) -> SyncResult<Uuid> {
        validate_ping_id(ping_id)?;
        let email = normalize_email(email)?;
        let display_name = validate_display_name(display_name)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(SyncError::validation("password", "must be at least 6 characters"));
        }

        if self.resolve_ping_id(ping_id).await?.is_some() {
            return Err(SyncError::DuplicateIdentifier(ping_id.to_string()));
        }

        let user_id = Uuid::new_v4();

        let uid = user_id.to_string();
        let cred_email = email.clone();
        let password = password.to_string();
        let created = self
            .backend
            .run(move |db| {
                if db.get_credential_by_email(&cred_email)?.is_some() {
                    return Ok(false);
                }

                // Hash password with Argon2id
                let salt = SaltString::generate(&mut OsRng);
                let password_hash = Argon2::default()
                    .hash_password(password.as_bytes(), &salt)
                    .map_err(|e| anyhow!("Password hashing failed: {}", e))?
                    .to_string();

                db.create_credential(&uid, &cred_email, &password_hash)?;
                Ok(true)
            })
            .await?;

        if !created {
            return Err(SyncError::EmailInUse(email));
        }

        let user = User {
            id: user_id,
            display_name,
            ping_id: ping_id.to_string(),
            profile_image: None,
            email,
            created_at: Utc::now(),
        };

        let profile = self
            .backend
            .run(move |db| db.set(USERS, &user.id.to_string(), serde_json::to_value(&user)?))
            .await;

        if let Err(e) = profile {
            warn!("Profile write failed for {}, removing credential", user_id);
            let uid = user_id.to_string();
            if let Err(cleanup) = self.backend.run(move |db| db.delete_credential(&uid)).await {
                error!("Credential {} left without a profile: {}", user_id, cleanup);
            }
            return Err(e);
        }

        info!("Registered {} with ping id {}", user_id, ping_id);
        Ok(user_id)
    }

    /// Exact, case-sensitive lookup. `None` is the ordinary "not found".
    pub async fn resolve_ping_id(&self, ping_id: &str) -> SyncResult<Option<User>> {
        let wanted = ping_id.to_string();
        let docs = self
            .backend
            .run(move |db| db.query_equals(USERS, "pingId", wanted))
            .await?;

        let mut users: Vec<User> = decode_all(&docs);
        if users.len() > 1 {
            warn!("Ping id {} is held by {} users", ping_id, users.len());
        }
        Ok(users.pop())
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> SyncResult<Session> {
        let email = normalize_email(email).map_err(|_| SyncError::InvalidCredentials)?;

        let lookup = email.clone();
        let password = password.to_string();
        let verified = self
            .backend
            .run(move |db| {
                let Some(cred) = db.get_credential_by_email(&lookup)? else {
                    return Ok(None);
                };

                let parsed = PasswordHash::new(&cred.password)
                    .map_err(|e| anyhow!("Corrupt password hash for {}: {}", cred.user_id, e))?;
                let ok = Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok();

                Ok(ok.then_some(cred.user_id))
            })
            .await?;

        let user_id: Uuid = verified
            .ok_or(SyncError::InvalidCredentials)?
            .parse()
            .map_err(|e| SyncError::Backend(anyhow!("Corrupt credential id: {}", e)))?;

        if self.find_profile(user_id).await?.is_none() {
            return Err(SyncError::ProfileMissing(user_id));
        }

        info!("{} signed in", user_id);
        Ok(Session { user_id, email })
    }

    /// Sessions are plain values; signing out only ends this one.
    pub fn sign_out(&self, session: Session) {
        info!("{} signed out", session.user_id);
    }

    pub async fn get_profile(&self, user_id: Uuid) -> SyncResult<User> {
        self.find_profile(user_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("user {}", user_id)))
    }

    pub async fn update_profile(&self, session: &Session, display_name: Option<&str>) -> SyncResult<User> {
        if let Some(name) = display_name {
            let name = validate_display_name(name)?;
            let id = session.user_id.to_string();
            self.backend
                .run(move |db| db.update(USERS, &id, json!({ "displayName": name })))
                .await?;
        }
        self.get_profile(session.user_id).await
    }

    /// Store the image as a blob and point the profile at it.
    pub async fn upload_profile_image(&self, session: &Session, bytes: &[u8]) -> SyncResult<User> {
        if bytes.is_empty() {
            return Err(SyncError::validation("image", "must not be empty"));
        }
        if bytes.len() > MAX_PROFILE_IMAGE_SIZE {
            return Err(SyncError::validation("image", "must be at most 5 MB"));
        }

        let blob_id = self.backend.blobs().put(session.user_id, bytes).await.map_err(|e| {
            error!("Profile image upload failed for {}: {:#}", session.user_id, e);
            SyncError::Backend(e)
        })?;

        let id = session.user_id.to_string();
        self.backend
            .run(move |db| db.update(USERS, &id, json!({ "profileImage": blob_id.to_string() })))
            .await?;

        self.get_profile(session.user_id).await
    }

    pub async fn profile_image(&self, blob_id: Uuid) -> SyncResult<Vec<u8>> {
        self.backend
            .blobs()
            .get(blob_id)
            .await
            .map_err(SyncError::Backend)?
            .ok_or_else(|| SyncError::NotFound(format!("image {}", blob_id)))
    }

    async fn find_profile(&self, user_id: Uuid) -> SyncResult<Option<User>> {
        let doc = self
            .backend
            .run(move |db| db.get(USERS, &user_id.to_string()))
            .await?;
        doc.map(|d| d.decode::<User>())
            .transpose()
            .map_err(SyncError::Backend)
    }
}

/// A Ping ID is 4 to 32 characters and contains no whitespace.
pub fn validate_ping_id(ping_id: &str) -> SyncResult<()> {
    let len = ping_id.chars().count();
    if len < MIN_PING_ID_LEN {
        return Err(SyncError::InvalidPingId("must be at least 4 characters"));
    }
    if len > MAX_PING_ID_LEN {
        return Err(SyncError::InvalidPingId("must be at most 32 characters"));
    }
    if ping_id.chars().any(char::is_whitespace) {
        return Err(SyncError::InvalidPingId("must not contain spaces"));
    }
    Ok(())
}

fn normalize_email(email: &str) -> SyncResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(SyncError::validation("email", "must be an email address")),
    }
}

fn validate_display_name(name: &str) -> SyncResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SyncError::validation("display name", "must not be blank"));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(SyncError::validation("display name", "must be at most 64 characters"));
    }
    Ok(name.to_string())
}
