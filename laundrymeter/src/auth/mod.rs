//! Request authentication.
//!
//! Callers present either a locally issued token (as a Bearer token or
//! as the Basic username) or directory credentials over Basic auth. The
//! [`Authenticator`] is composed once at startup and shared by the API.

mod directory;

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub use directory::{DirectoryConfig, DirectoryEntry, StaticDirectory};

use crate::store::{StoreError, UserStore};
use crate::tracing::prelude::*;
use crate::user::{User, UserIdentity};

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("missing credentials")]
    Missing,

    #[error("malformed authorization header")]
    Malformed,

    #[error("invalid credentials")]
    Rejected,

    #[error("identity provider unavailable: {0}")]
    Provider(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Credentials::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}

impl Credentials {
    /// Parse an `Authorization` header value.
    pub fn from_authorization(value: &str) -> Result<Self, AuthError> {
        let (scheme, rest) = value.trim().split_once(' ').ok_or(AuthError::Malformed)?;
        let rest = rest.trim();

        if scheme.eq_ignore_ascii_case("bearer") {
            if rest.is_empty() {
                return Err(AuthError::Malformed);
            }
            return Ok(Credentials::Bearer(rest.to_string()));
        }

        if scheme.eq_ignore_ascii_case("basic") {
            let decoded = STANDARD.decode(rest).map_err(|_| AuthError::Malformed)?;
            let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;
            let (username, password) = decoded.split_once(':').ok_or(AuthError::Malformed)?;
            return Ok(Credentials::Basic {
                username: username.to_string(),
                password: password.to_string(),
            });
        }

        Err(AuthError::Malformed)
    }
}

/// External check of a username and password.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` for wrong credentials, `Err` when the provider itself
    /// could not answer.
    async fn verify(&self, username: &str, password: &str)
    -> Result<Option<UserIdentity>, AuthError>;
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthError>;
}

/// Local tokens first, then the directory. Users are created on their
/// first successful directory login.
pub struct TokenOrDirectory {
    users: Arc<dyn UserStore>,
    directory: Arc<dyn IdentityProvider>,
}

impl TokenOrDirectory {
    pub fn new(users: Arc<dyn UserStore>, directory: Arc<dyn IdentityProvider>) -> Self {
        Self { users, directory }
    }
}

#[async_trait]
impl Authenticator for TokenOrDirectory {
    async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthError> {
        match credentials {
            Credentials::Bearer(token) => self
                .users
                .user_by_auth_token(token)?
                .ok_or(AuthError::Rejected),

            Credentials::Basic { username, password } => {
                if username.is_empty() {
                    return Err(AuthError::Rejected);
                }
                if let Some(user) = self.users.user_by_auth_token(username)? {
                    return Ok(user);
                }
                if password.is_empty() {
                    return Err(AuthError::Rejected);
                }

                let identity = self
                    .directory
                    .verify(username, password)
                    .await?
                    .ok_or(AuthError::Rejected)?;
                let user = self.users.upsert_user(&identity)?;
                debug!(user = %user.identity, "Directory login");
                Ok(user)
            }
        }
    }
}
