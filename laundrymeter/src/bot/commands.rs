//! Chat command parsing and replies.

use time::format_description::well_known::Rfc3339;

use crate::service::{LaundryService, ServiceError};
use crate::tracing::prelude::*;
use crate::user::User;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start <token>` from a registration deep link.
    Start(Option<String>),
    Status,
    Debug,
    Notify,
    Stop,
    Help,
    Unknown(String),
}

impl Command {
    /// Parse a message text. `None` for anything that is not a command.
    ///
    /// Accepts the `/cmd@BotName` form Telegram uses in group chats.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let (word, args) = match rest.split_once(char::is_whitespace) {
            Some((word, args)) => (word, args.trim()),
            None => (rest, ""),
        };
        let name = word.split('@').next().unwrap_or(word).to_ascii_lowercase();

        Some(match name.as_str() {
            "start" => Command::Start(
                args.split_whitespace()
                    .next()
                    .map(str::to_string),
            ),
            "status" => Command::Status,
            "debug" => Command::Debug,
            "notify" => Command::Notify,
            "stop" => Command::Stop,
            "help" => Command::Help,
            _ => Command::Unknown(name),
        })
    }
}

const HELP: &str = "Commands:\n\
    /status - is the washing machine running?\n\
    /debug - latest meter readings\n\
    /notify - message me when the laundry is ready\n\
    /stop - cancel the notification\n\
    /help - this text";

const NOT_REGISTERED: &str =
    "This chat is not registered. Request a registration link from the Laundrymeter API first.";

const FAILED: &str = "Something went wrong, please try again later.";

/// Execute `command` sent from `chat_address` and produce the reply.
pub fn handle(service: &LaundryService, chat_address: &str, command: Command) -> String {
    match command {
        Command::Help => HELP.to_string(),
        Command::Start(None) => {
            "Missing token. Open the registration link from the Laundrymeter API.".to_string()
        }
        Command::Start(Some(token)) => match service.register_chat_address(&token, chat_address)
        {
            Ok(user) => format!(
                "Hi {}! This chat is registered. Send /notify to be told when the laundry is ready.",
                user.name
            ),
            Err(ServiceError::UnknownToken) => {
                debug!(chat = %chat_address, "Invalid registration token");
                "Invalid or already used token. Request a new registration link.".to_string()
            }
            Err(e) => {
                error!(chat = %chat_address, error = %e, "Chat registration failed");
                FAILED.to_string()
            }
        },
        Command::Unknown(name) => format!("Unknown command /{name}. Send /help for a list."),
        command => match service.user_for_chat(chat_address) {
            Ok(Some(user)) => handle_registered(service, &user, command),
            Ok(None) => {
                debug!(chat = %chat_address, "Command from unregistered chat");
                NOT_REGISTERED.to_string()
            }
            Err(e) => {
                error!(chat = %chat_address, error = %e, "Chat lookup failed");
                FAILED.to_string()
            }
        },
    }
}

fn handle_registered(service: &LaundryService, user: &User, command: Command) -> String {
    let result = match command {
        Command::Status => service.get_latest_status().map(|status| match status {
            None => "No data recorded yet.".to_string(),
            Some(status) => {
                let state = if status.running { "running" } else { "idle" };
                match status.last_changed.and_then(|t| t.format(&Rfc3339).ok()) {
                    Some(since) => format!("The washing machine is {state} (since {since})."),
                    None => format!("The washing machine is {state}."),
                }
            }
        }),
        Command::Debug => service.get_debug_status().map(|debug| match debug {
            None => "No data recorded yet.".to_string(),
            Some(d) => format!(
                "running: {}\npower: {:.1} W\nvoltage: {:.1} V\ncurrent: {:.3} A\ntotal: {:.1} Wh",
                d.running, d.power, d.voltage, d.current, d.total_energy
            ),
        }),
        Command::Notify => service
            .set_chat_preference(user, true)
            .map(|_| "You will be notified as soon as the laundry is ready.".to_string()),
        Command::Stop => service
            .set_chat_preference(user, false)
            .map(|_| "Notification cancelled.".to_string()),
        Command::Start(_) | Command::Help | Command::Unknown(_) => Ok(HELP.to_string()),
    };

    result.unwrap_or_else(|e| {
        error!(user = %user.identity, error = %e, "Chat command failed");
        FAILED.to_string()
    })
}
