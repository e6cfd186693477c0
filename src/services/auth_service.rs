use bcrypt::{hash, verify, DEFAULT_COST};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::{DbError, User, UserRepository};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("name, email and password are required")]
    MissingField,
    #[error("name or email already registered")]
    AlreadyRegistered,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),
    #[error("password hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Db(#[from] DbError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Clone)]
pub struct AuthService {
    user_repo: UserRepository,
}

impl AuthService {
    pub fn new(user_repo: UserRepository) -> Self {
        Self { user_repo }
    }

    #[instrument(skip(self, registration), fields(name = %registration.name))]
    pub async fn register(&self, registration: Registration) -> Result<User, AuthError> {
        let name = registration.name.trim().to_string();
        let email = registration.email.trim().to_string();
        if name.is_empty() || email.is_empty() || registration.password.is_empty() {
            return Err(AuthError::MissingField);
        }

        // bcrypt is CPU-bound
        let password = registration.password;
        let password_hash =
            tokio::task::spawn_blocking(move || hash(password, DEFAULT_COST)).await??;

        match self.user_repo.create(&name, &email, &password_hash).await {
            Ok(user) => Ok(user),
            Err(e) if e.is_unique_violation() => {
                warn!("Registration rejected, name or email taken");
                Err(AuthError::AlreadyRegistered)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Verify credentials and return the user's API key, issuing one on the
    /// first successful login.
    #[instrument(skip(self, password))]
    pub async fn login(&self, name: &str, password: &str) -> Result<String, AuthError> {
        let user = self
            .user_repo
            .find_by_name(name)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let password = password.to_string();
        let stored_hash = user.password_hash.clone();
        let valid = tokio::task::spawn_blocking(move || verify(password, &stored_hash)).await??;
        if !valid {
            debug!("Password mismatch for {}", name);
            return Err(AuthError::InvalidCredentials);
        }

        if let Some(api_key) = user.api_key {
            return Ok(api_key);
        }

        let issued = Uuid::new_v4().to_string();
        let api_key = self.user_repo.assign_api_key(user.id, &issued).await?;
        info!("Issued API key for user {}", user.name);
        Ok(api_key)
    }

    /// Resolve an API key to its owner
    pub async fn authenticate_key(&self, api_key: &str) -> Result<Option<User>, AuthError> {
        Ok(self.user_repo.find_by_api_key(api_key).await?)
    }
}
