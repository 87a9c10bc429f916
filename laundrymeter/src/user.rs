//! Users and notification channels.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

/// Ways a user can be told that the laundry is ready.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize, ToSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Chat,
}

/// Identity as confirmed by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub username: String,
    pub name: String,
    pub email: String,
}

/// A locally known user and their notification preferences.
///
/// Tokens are deliberately not part of this type; the store only
/// exposes lookups by token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub identity: String,
    pub name: String,
    pub email: String,
    pub wants_email: bool,
    pub wants_chat: bool,
    /// Set once the user bound a chat through the bot.
    pub chat_address: Option<String>,
    /// Bumped on every user-side change to the email preference.
    pub email_revision: u64,
    /// Bumped on chat preference changes and chat (re)binding.
    pub chat_revision: u64,
}

impl User {
    pub fn wants(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.wants_email,
            Channel::Chat => self.wants_chat,
        }
    }

    pub fn revision(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Email => self.email_revision,
            Channel::Chat => self.chat_revision,
        }
    }

    /// Where to deliver on `channel`, if the user can be reached there.
    pub fn address(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => Some(self.email.as_str()).filter(|e| !e.is_empty()),
            Channel::Chat => self.chat_address.as_deref(),
        }
    }
}
