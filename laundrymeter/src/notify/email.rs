//! Email delivery over SMTP submission.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;

use super::{Notification, NotificationError, NotificationSink};
use crate::tracing::prelude::*;
use crate::user::Channel;

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub relay: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Sender mailbox, e.g. `Laundrymeter <laundry@example.org>`.
    pub from: String,

    /// Upgrade the connection with STARTTLS. Disable only for a relay on
    /// localhost.
    #[serde(default = "default_starttls")]
    pub starttls: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

pub struct SmtpSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    timeout: Duration,
}

impl SmtpSink {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotificationError> {
        let from = parse_mailbox(&config.from)?;
        let timeout = Duration::from_secs(config.timeout_secs);

        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.relay)
                .map_err(|e| NotificationError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.relay)
        };
        builder = builder.port(config.port).timeout(Some(timeout));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            timeout,
        })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotificationError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| NotificationError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn build_message(
    from: &Mailbox,
    to: &str,
    notification: &Notification,
) -> Result<Message, NotificationError> {
    Message::builder()
        .from(from.clone())
        .to(parse_mailbox(to)?)
        .subject(notification.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(notification.body.clone())
        .map_err(|e| NotificationError::InvalidAddress {
            address: to.to_string(),
            reason: e.to_string(),
        })
}

#[async_trait]
impl NotificationSink for SmtpSink {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        address: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError> {
        let message = build_message(&self.from, address, notification)?;

        match tokio::time::timeout(self.timeout, self.transport.send(message)).await {
            Ok(Ok(response)) => {
                debug!(to = %address, code = %response.code(), "Email accepted by relay");
                Ok(())
            }
            Ok(Err(e)) => Err(NotificationError::Transport(e.to_string())),
            Err(_) => Err(NotificationError::Timeout),
        }
    }
}
