//! Account registration and password login.
//!
//! Passwords are stored as Argon2id PHC strings. A successful login returns a
//! bearer token signed by the same [`JwtVerifier`] the API checks requests
//! against. New accounts are never admins; privilege is granted in the
//! database.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use std::sync::Arc;
use std::time::Duration;

use crate::db::{StoreError, UserStore};
use crate::models::user::User;
use crate::services::auth::{AuthError, JwtVerifier};

pub const MIN_PASSWORD_LENGTH: usize = 8;

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// `Ok(false)` on a mismatch; `Err` only for an unparseable stored hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(hash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e),
    }
}

/// A signed bearer token and how long it stays valid.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: Duration,
}

pub struct AccountService {
    users: Arc<dyn UserStore>,
    tokens: Arc<JwtVerifier>,
    token_ttl: Duration,
}

impl AccountService {
    pub fn new(users: Arc<dyn UserStore>, tokens: Arc<JwtVerifier>, token_ttl: Duration) -> Self {
        Self {
            users,
            tokens,
            token_ttl,
        }
    }

    /// The verifier request extractors check tokens against.
    pub fn verifier(&self) -> Arc<JwtVerifier> {
        self.tokens.clone()
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<User, AccountError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AccountError::Validation(
                "username must not be empty".to_string(),
            ));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AccountError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters long"
            )));
        }

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AccountError::Hash(e.to_string()))?
            .map_err(|e| AccountError::Hash(e.to_string()))?;

        let user = User::new(username, password_hash);
        match self.users.create(&user).await {
            Ok(()) => {}
            Err(StoreError::UsernameTaken(name)) => return Err(AccountError::UsernameTaken(name)),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %user.id, username = %user.username, "Account registered");
        Ok(user)
    }

    /// Check credentials and issue a bearer token for the account.
    ///
    /// Unknown usernames and wrong passwords are indistinguishable to the
    /// caller.
    pub async fn login(&self, username: &str, password: &str) -> Result<IssuedToken, AccountError> {
        let Some(user) = self.users.find_by_username(username.trim()).await? else {
            tracing::debug!(username = %username, "Login for unknown username");
            return Err(AccountError::InvalidCredentials);
        };

        let password = password.to_string();
        let stored = user.password_hash.clone();
        let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
            .await
            .map_err(|e| AccountError::Hash(e.to_string()))?
            .map_err(|e| AccountError::Hash(e.to_string()))?;
        if !valid {
            tracing::info!(user_id = %user.id, "Login rejected: wrong password");
            return Err(AccountError::InvalidCredentials);
        }

        let ttl_secs = i64::try_from(self.token_ttl.as_secs()).unwrap_or(i64::MAX);
        let token = self.tokens.issue(&user.principal(), ttl_secs)?;
        tracing::info!(user_id = %user.id, "Login succeeded");
        Ok(IssuedToken {
            token,
            expires_in: self.token_ttl,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("username `{0}` is already taken")]
    UsernameTaken(String),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Token(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
