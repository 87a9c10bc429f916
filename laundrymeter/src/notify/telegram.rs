//! Telegram Bot API client.
//!
//! Used both as the chat [`NotificationSink`] and by the bot's update
//! loop. Only the handful of methods the daemon needs are wrapped.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Notification, NotificationError, NotificationSink};
use crate::tracing::prelude::*;
use crate::user::Channel;

#[derive(Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,

    /// Bot username for registration links. Looked up with `getMe` when
    /// not set.
    #[serde(default)]
    pub bot_name: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Long-poll duration for `getUpdates`.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("bot_name", &self.bot_name)
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

impl TelegramConfig {
    /// Config with defaults for everything but the token.
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            bot_name: None,
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_poll_timeout_secs() -> u64 {
    30
}

/// Envelope around every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, NotificationError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| NotificationError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.bot_token
            ),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn call<P, R>(
        &self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<R, NotificationError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body: ApiResponse<R> = response.json().await.map_err(|e| {
            NotificationError::Transport(format!("{method}: HTTP {status}: {e}"))
        })?;

        match body {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(NotificationError::Transport(format!(
                "{method}: {}",
                description.unwrap_or_else(|| format!("HTTP {status}"))
            ))),
        }
    }

    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
    ) -> Result<Message, NotificationError> {
        if chat_id.is_empty() {
            return Err(NotificationError::InvalidAddress {
                address: chat_id.to_string(),
                reason: "empty chat id".to_string(),
            });
        }
        self.call("sendMessage", &SendMessage { chat_id, text }, self.timeout)
            .await
    }

    /// Long-poll for new updates starting at `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        poll_timeout: Duration,
    ) -> Result<Vec<Update>, NotificationError> {
        let params = json!({
            "offset": offset,
            "timeout": poll_timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", &params, poll_timeout + self.timeout)
            .await
    }

    pub async fn get_me(&self) -> Result<BotUser, NotificationError> {
        self.call("getMe", &json!({}), self.timeout).await
    }
}

fn transport_error(e: reqwest::Error) -> NotificationError {
    if e.is_timeout() {
        NotificationError::Timeout
    } else {
        NotificationError::Transport(e.to_string())
    }
}

#[async_trait]
impl NotificationSink for TelegramClient {
    fn channel(&self) -> Channel {
        Channel::Chat
    }

    async fn send(
        &self,
        address: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError> {
        let message = self.send_message(address, &notification.body).await?;
        trace!(chat = %address, message_id = message.message_id, "Chat notification sent");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::Value;

    use super::*;

    /// Minimal stand-in for the Bot API. Chat id "blocked" is refused.
    #[derive(Clone, Default)]
    pub(crate) struct FakeBotApi {
        pub(crate) sent: Arc<Mutex<Vec<(String, String)>>>,
        pub(crate) updates: Arc<Mutex<Vec<Value>>>,
    }

    async fn send_message(
        State(api): State<FakeBotApi>,
        Json(body): Json<Value>,
    ) -> (axum::http::StatusCode, Json<Value>) {
        let chat_id = body["chat_id"].as_str().unwrap_or_default().to_string();
        let text = body["text"].as_str().unwrap_or_default().to_string();
        if chat_id == "blocked" {
            return (
                axum::http::StatusCode::FORBIDDEN,
                Json(json!({"ok": false, "description": "Forbidden: bot was blocked by the user"})),
            );
        }
        api.sent.lock().push((chat_id.clone(), text));
        (
            axum::http::StatusCode::OK,
            Json(json!({"ok": true, "result": {"message_id": 1, "chat": {"id": 0}, "text": "ok"}})),
        )
    }

    async fn get_updates(State(api): State<FakeBotApi>, Json(body): Json<Value>) -> Json<Value> {
        let offset = body["offset"].as_i64().unwrap_or(0);
        let updates: Vec<Value> = api
            .updates
            .lock()
            .iter()
            .filter(|u| u["update_id"].as_i64().unwrap_or(0) >= offset)
            .cloned()
            .collect();
        Json(json!({"ok": true, "result": updates}))
    }

    async fn get_me() -> Json<Value> {
        Json(json!({"ok": true, "result": {"id": 42, "username": "laundry_bot"}}))
    }

    /// Serve the fake API on an ephemeral port, returning a client config.
    pub(crate) async fn spawn_fake_api(api: FakeBotApi) -> TelegramConfig {
        let app = Router::new()
            .route("/bottest-token/sendMessage", post(send_message))
            .route("/bottest-token/getUpdates", post(get_updates))
            .route("/bottest-token/getMe", post(get_me))
            .with_state(api);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TelegramConfig {
            bot_token: "test-token".to_string(),
            bot_name: None,
            api_url: format!("http://{addr}"),
            timeout_secs: 2,
            poll_timeout_secs: 0,
        }
    }

    #[tokio::test]
    async fn sends_notification_body() {
        let api = FakeBotApi::default();
        let client = TelegramClient::new(&spawn_fake_api(api.clone()).await).unwrap();

        client
            .send("1234", &Notification::laundry_ready())
            .await
            .unwrap();

        assert_eq!(
            api.sent.lock().clone(),
            vec![(
                "1234".to_string(),
                "The washing machine has just finished!".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn api_refusal_is_transport_error_and_batch_continues() {
        let api = FakeBotApi::default();
        let client = TelegramClient::new(&spawn_fake_api(api.clone()).await).unwrap();

        let recipients = ["blocked", "1", "2"]
            .iter()
            .enumerate()
            .map(|(i, address)| crate::notify::Recipient {
                identity: format!("user{i}"),
                address: address.to_string(),
                revision: 0,
            })
            .collect();

        let deliveries = client
            .send_batch(recipients, &Notification::laundry_ready())
            .await;

        assert_eq!(deliveries.len(), 3);
        match &deliveries[0].result {
            Err(NotificationError::Transport(msg)) => assert!(msg.contains("blocked")),
            other => panic!("expected transport error, got {other:?}"),
        }
        assert!(deliveries[1].result.is_ok());
        assert!(deliveries[2].result.is_ok());
        assert_eq!(api.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn empty_chat_id_is_invalid() {
        let config = TelegramConfig {
            bot_token: "t".to_string(),
            bot_name: None,
            api_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            poll_timeout_secs: 0,
        };
        let client = TelegramClient::new(&config).unwrap();
        assert!(matches!(
            client.send_message("", "hi").await,
            Err(NotificationError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn reads_updates_and_bot_name() {
        let api = FakeBotApi::default();
        api.updates.lock().push(json!({
            "update_id": 7,
            "message": {"message_id": 3, "chat": {"id": 99}, "text": "/status"}
        }));
        let client = TelegramClient::new(&spawn_fake_api(api).await).unwrap();

        let updates = client.get_updates(None, Duration::ZERO).await.unwrap();
        assert_eq!(updates.len(), 1);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.chat.id, 99);
        assert_eq!(message.text.as_deref(), Some("/status"));

        assert!(client.get_updates(Some(8), Duration::ZERO).await.unwrap().is_empty());

        let me = client.get_me().await.unwrap();
        assert_eq!(me.username.as_deref(), Some("laundry_bot"));
    }
}
