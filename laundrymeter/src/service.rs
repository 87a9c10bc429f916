//! Operations offered to the REST API and the chat bot.

use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::api_client::types::{MachineDebug, MachineStatus};
use crate::store::{SampleStore, StoreError, UserStore};
use crate::tracing::prelude::*;
use crate::user::{Channel, User};

/// Upper bound on samples returned by one history query.
pub const MAX_HISTORY: usize = 10_000;

const TOKEN_LEN: usize = 32;

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("register a chat with the bot before enabling chat notifications")]
    ChatNotRegistered,

    #[error("unknown or already used registration token")]
    UnknownToken,

    #[error("chat bot is not configured")]
    ChatUnavailable,
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Clone)]
pub struct LaundryService {
    samples: Arc<dyn SampleStore>,
    users: Arc<dyn UserStore>,
    bot_name: Option<String>,
}

impl LaundryService {
    pub fn new(
        samples: Arc<dyn SampleStore>,
        users: Arc<dyn UserStore>,
        bot_name: Option<String>,
    ) -> Self {
        Self {
            samples,
            users,
            bot_name,
        }
    }

    /// Status from the most recent stored sample.
    pub fn get_latest_status(&self) -> Result<Option<MachineStatus>> {
        Ok(self.samples.latest()?.as_ref().map(MachineStatus::from))
    }

    /// The most recent stored sample with all meter readings.
    pub fn get_debug_status(&self) -> Result<Option<MachineDebug>> {
        Ok(self.samples.latest()?.as_ref().map(MachineDebug::from))
    }

    /// Up to `count` samples, most recent first, capped at [`MAX_HISTORY`].
    pub fn get_history(&self, count: usize) -> Result<Vec<MachineDebug>> {
        let samples = self.samples.range(count.min(MAX_HISTORY))?;
        Ok(samples.iter().map(MachineDebug::from).collect())
    }

    pub fn set_email_preference(&self, user: &User, enabled: bool) -> Result<User> {
        let user = self.users.set_preference(&user.identity, Channel::Email, enabled)?;
        debug!(user = %user.identity, enabled, "Email preference changed");
        Ok(user)
    }

    /// Fails closed when enabling without a registered chat.
    pub fn set_chat_preference(&self, user: &User, enabled: bool) -> Result<User> {
        let user = self
            .users
            .set_preference(&user.identity, Channel::Chat, enabled)
            .map_err(|e| match e {
                StoreError::ChatNotRegistered(_) => ServiceError::ChatNotRegistered,
                e => e.into(),
            })?;
        debug!(user = %user.identity, enabled, "Chat preference changed");
        Ok(user)
    }

    pub fn set_preference(&self, user: &User, channel: Channel, enabled: bool) -> Result<User> {
        match channel {
            Channel::Email => self.set_email_preference(user, enabled),
            Channel::Chat => self.set_chat_preference(user, enabled),
        }
    }

    /// Bind `chat_address` to whoever was issued `token`.
    pub fn register_chat_address(&self, token: &str, chat_address: &str) -> Result<User> {
        let user = self
            .users
            .bind_chat_address(token, chat_address)?
            .ok_or(ServiceError::UnknownToken)?;
        info!(user = %user.identity, "Chat registered");
        Ok(user)
    }

    /// Replace the user's API token with a fresh one.
    pub fn issue_auth_token(&self, user: &User) -> Result<String> {
        let token = generate_token();
        self.users.set_auth_token(&user.identity, &token)?;
        Ok(token)
    }

    /// Issue a one-time registration token and return the bot deep link.
    pub fn issue_chat_link(&self, user: &User) -> Result<String> {
        let bot = self.bot_name.as_deref().ok_or(ServiceError::ChatUnavailable)?;
        let token = generate_token();
        self.users.set_chat_token(&user.identity, &token)?;
        Ok(format!("https://t.me/{bot}?start={token}"))
    }

    /// Display names of users waiting for a notification on `channel`.
    pub fn subscribers(&self, channel: Channel) -> Result<Vec<String>> {
        Ok(self
            .users
            .subscribers(channel)?
            .into_iter()
            .map(|u| u.name)
            .collect())
    }

    pub fn user_for_chat(&self, chat_address: &str) -> Result<Option<User>> {
        Ok(self.users.user_by_chat_address(chat_address)?)
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}
