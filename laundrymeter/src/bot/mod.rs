//! Telegram chat bot.
//!
//! Long-polls the Bot API for messages and answers commands. The bot
//! runs as its own task; its failures are retried with backoff and never
//! reach the poller.

mod backoff;
mod commands;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use commands::{Command, handle};

use crate::notify::telegram::{TelegramClient, TelegramConfig, Update};
use crate::service::LaundryService;
use crate::tracing::prelude::*;
use backoff::Backoff;

const RETRY_INITIAL: Duration = Duration::from_secs(1);
const RETRY_MAX: Duration = Duration::from_secs(60);

pub struct ChatBot {
    client: TelegramClient,
    service: LaundryService,
    poll_timeout: Duration,
}

impl ChatBot {
    pub fn new(client: TelegramClient, service: LaundryService, config: &TelegramConfig) -> Self {
        Self {
            client,
            service,
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut offset: Option<i64> = None;
        let mut backoff = Backoff::new(RETRY_INITIAL, RETRY_MAX);
        info!("Chat bot started");

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.client.get_updates(offset, self.poll_timeout) => polled,
            };

            match polled {
                Ok(updates) => {
                    backoff.reset();
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, retry_in = ?delay, "Chat bot poll failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("Chat bot stopped");
    }

    async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(command) = message.text.as_deref().and_then(Command::parse) else {
            return;
        };

        let chat = message.chat.id.to_string();
        trace!(%chat, ?command, "Chat command");
        let reply = handle(&self.service, &chat, command);

        if let Err(e) = self.client.send_message(&chat, &reply).await {
            warn!(%chat, error = %e, "Failed to reply");
        }
    }
}
