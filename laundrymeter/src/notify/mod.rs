//! Completion notifications.
//!
//! A [`NotificationSink`] delivers one message to many recipients on one
//! [`Channel`]. The [`TransitionNotifier`] decides when to fire and which
//! users to contact.

pub mod email;
mod notifier;
pub mod telegram;

use async_trait::async_trait;

pub use notifier::{ChannelReport, TransitionNotifier};
#[cfg(test)]
pub(crate) use notifier::tests::{RecordingSink, add_user};

use crate::user::Channel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn laundry_ready() -> Self {
        Self {
            subject: "Laundry is ready".to_string(),
            body: "The washing machine has just finished!".to_string(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum NotificationError {
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("delivery timed out")]
    Timeout,
}

/// A user about to be contacted, as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub identity: String,
    pub address: String,
    /// Channel revision at the time the subscriber list was read.
    pub revision: u64,
}

/// Outcome of one delivery attempt.
#[derive(Debug)]
pub struct Delivery {
    pub recipient: Recipient,
    pub result: Result<(), NotificationError>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, address: &str, notification: &Notification)
    -> Result<(), NotificationError>;

    /// Attempt every recipient in turn. A failure never stops the batch.
    async fn send_batch(
        &self,
        recipients: Vec<Recipient>,
        notification: &Notification,
    ) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let result = self.send(&recipient.address, notification).await;
            deliveries.push(Delivery { recipient, result });
        }
        deliveries
    }
}
