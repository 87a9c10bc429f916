//! Persistence for machine history and users.
//!
//! The traits are synchronous; every operation is a single short SQLite
//! statement and callers hold no locks across awaits.

mod history;
mod sqlite;

use std::path::PathBuf;

use serde::Deserialize;

pub use history::{Eviction, History, Overflow, RetentionConfig};
pub use sqlite::SqliteStore;

use crate::machine::Sample;
use crate::user::{Channel, User, UserIdentity};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("unknown user: {0}")]
    UserNotFound(String),

    #[error("no chat registered for {0}")]
    ChatNotRegistered(String),

    #[error("timestamp out of range: {0} ms")]
    InvalidTimestamp(i64),

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("laundrymeter.sqlite"),
        }
    }
}

/// Ordered, append-only sample history.
pub trait SampleStore: Send + Sync {
    fn append(&self, sample: &Sample) -> Result<()>;

    fn latest(&self) -> Result<Option<Sample>>;

    /// Up to `limit` samples, most recent first.
    fn range(&self, limit: usize) -> Result<Vec<Sample>>;

    fn count(&self) -> Result<u64>;

    /// Delete the `n` oldest samples, returning how many were removed.
    fn delete_oldest(&self, n: u64) -> Result<u64>;

    fn delete_all(&self) -> Result<u64>;
}

/// Users, their preferences and their tokens.
pub trait UserStore: Send + Sync {
    fn user(&self, identity: &str) -> Result<Option<User>>;

    /// Insert a user on first sight, or refresh name and email from the
    /// directory. Preferences are left untouched.
    fn upsert_user(&self, identity: &UserIdentity) -> Result<User>;

    fn user_by_auth_token(&self, token: &str) -> Result<Option<User>>;

    fn user_by_chat_address(&self, address: &str) -> Result<Option<User>>;

    fn set_auth_token(&self, identity: &str, token: &str) -> Result<()>;

    fn set_chat_token(&self, identity: &str, token: &str) -> Result<()>;

    /// Bind `address` to the owner of the one-time chat `token` and
    /// consume the token. `None` if no user holds the token.
    ///
    /// An address already bound to another user moves to the new owner.
    fn bind_chat_address(&self, token: &str, address: &str) -> Result<Option<User>>;

    /// User-initiated preference change. Bumps the channel's revision.
    ///
    /// Enabling chat fails with [`StoreError::ChatNotRegistered`] unless
    /// a chat address is bound at the time of the write.
    fn set_preference(&self, identity: &str, channel: Channel, enabled: bool) -> Result<User>;

    /// Users currently waiting for a notification on `channel`.
    fn subscribers(&self, channel: Channel) -> Result<Vec<User>>;

    /// Clear the user's flag for `channel` after a notification attempt,
    /// unless the user changed that channel since `revision` was read.
    /// Returns whether the flag was cleared.
    fn consume_subscription(&self, identity: &str, channel: Channel, revision: u64)
    -> Result<bool>;
}
