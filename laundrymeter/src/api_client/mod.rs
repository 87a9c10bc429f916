//! Client for the daemon's HTTP API.

pub mod types;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::user::Channel;
use types::{
    ChatRegistration, ErrorBody, MachineDebug, MachineStatus, Subscribers, Subscription,
    TokenResponse,
};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7786";

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{status}: {message}")]
    Api { status: StatusCode, message: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone)]
enum Auth {
    Bearer(String),
    Basic { username: String, password: String },
}

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    auth: Option<Auth>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: None,
        }
    }

    /// Authenticate with an API token from `GET /auth/token`.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(Auth::Bearer(token.into()));
        self
    }

    /// Authenticate with directory credentials.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.auth = Some(Auth::Basic {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .http
            .request(method, format!("{}/api/v0{}", self.base_url, path));
        match &self.auth {
            Some(Auth::Bearer(token)) => request.bearer_auth(token),
            Some(Auth::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.canonical_reason().unwrap_or("error").to_string(),
            };
            return Err(ClientError::Api { status, message });
        }
        Ok(response.json().await?)
    }

    pub async fn get_machine(&self) -> Result<MachineStatus> {
        self.send(self.request(Method::GET, "/machine")).await
    }

    pub async fn get_machine_debug(&self) -> Result<MachineDebug> {
        self.send(self.request(Method::GET, "/machine/debug")).await
    }

    pub async fn get_history(&self, count: usize) -> Result<Vec<MachineDebug>> {
        self.send(self.request(Method::GET, &format!("/machine/history/{count}")))
            .await
    }

    pub async fn get_subscribers(&self, channel: Channel) -> Result<Subscribers> {
        self.send(self.request(Method::GET, &format!("/notify/{channel}")))
            .await
    }

    pub async fn set_subscription(&self, channel: Channel, enabled: bool) -> Result<Subscription> {
        let method = if enabled { Method::POST } else { Method::DELETE };
        self.send(self.request(method, &format!("/notify/{channel}")))
            .await
    }

    pub async fn issue_token(&self) -> Result<TokenResponse> {
        self.send(self.request(Method::GET, "/auth/token")).await
    }

    pub async fn register_chat(&self) -> Result<ChatRegistration> {
        self.send(self.request(Method::POST, "/notify/chat/register"))
            .await
    }
}
