//! Daemon assembly.
//!
//! Opens the database, builds the sensor, sinks, notifier, poller, API
//! and chat bot from a validated [`Config`], then runs them as sibling
//! tasks until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::api::{self, SharedState};
use crate::auth::{StaticDirectory, TokenOrDirectory};
use crate::bot::ChatBot;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::machine::StateEstimator;
use crate::notify::email::SmtpSink;
use crate::notify::telegram::{TelegramClient, TelegramConfig};
use crate::notify::{NotificationSink, TransitionNotifier};
use crate::poller::{Poller, PollerContext};
use crate::sensor::SmartPlug;
use crate::service::LaundryService;
use crate::store::{History, SqliteStore};
use crate::tracing::prelude::*;

pub struct Daemon {
    poller: Poller,
    listener: TcpListener,
    state: SharedState,
    bot: Option<ChatBot>,
}

impl Daemon {
    /// Build every component. Fails on anything that would keep the
    /// daemon from doing its job: an unusable database, a listen address
    /// that cannot be bound or a malformed sink configuration.
    pub async fn build(config: Config) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(SqliteStore::open(&config.database.path)?);
        info!(path = %config.database.path.display(), "Database ready");

        let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();
        if let Some(smtp) = &config.smtp {
            sinks.push(Arc::new(SmtpSink::new(smtp)?));
            info!(relay = %smtp.relay, "Email notifications enabled");
        }

        let mut telegram = None;
        let mut bot_name = None;
        if let Some(telegram_config) = &config.telegram {
            let client = TelegramClient::new(telegram_config)?;
            bot_name = resolve_bot_name(&client, telegram_config).await;
            sinks.push(Arc::new(client.clone()));
            telegram = Some((client, telegram_config.clone()));
        }
        if sinks.is_empty() {
            warn!("No notification channel configured; completions will only be logged");
        }

        let notifier = Arc::new(TransitionNotifier::new(store.clone(), sinks));
        let poller = Poller::new(
            PollerContext {
                estimator: StateEstimator::new(config.estimator.clone()),
                sensor: Arc::new(SmartPlug::new(config.sensor.clone())),
                history: History::new(store.clone(), config.retention.clone()),
                clock: Arc::new(SystemClock),
                config: config.poller.clone(),
            },
            notifier,
        )?;

        let service = LaundryService::new(store.clone(), store.clone(), bot_name);
        let directory = Arc::new(StaticDirectory::new(config.directory.clone()));
        let state = SharedState {
            service: service.clone(),
            authenticator: Arc::new(TokenOrDirectory::new(store, directory)),
        };

        let listener = TcpListener::bind(config.api.listen)
            .await
            .map_err(|source| Error::Bind {
                addr: config.api.listen,
                source,
            })?;

        let bot = telegram.map(|(client, telegram_config)| {
            ChatBot::new(client, service, &telegram_config)
        });

        Ok(Self {
            poller,
            listener,
            state,
            bot,
        })
    }

    /// Address the API is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Run until `shutdown` fires and every task has wound down.
    pub async fn run(self, shutdown: CancellationToken) {
        let tracker = TaskTracker::new();

        tracker.spawn(self.poller.run(shutdown.child_token()));

        let api_shutdown = shutdown.child_token();
        let listener = self.listener;
        let state = self.state;
        let api_failed = shutdown.clone();
        tracker.spawn(async move {
            if let Err(e) = api::serve(listener, state, api_shutdown).await {
                error!(error = %e, "API server failed");
                api_failed.cancel();
            }
        });

        if let Some(bot) = self.bot {
            tracker.spawn(bot.run(shutdown.child_token()));
        }

        tracker.close();
        shutdown.cancelled().await;
        info!("Shutting down");
        tracker.wait().await;
        info!("Stopped");
    }
}

/// Bot username for registration links, from the config or `getMe`.
/// Without it the bot still answers, only links cannot be issued.
async fn resolve_bot_name(client: &TelegramClient, config: &TelegramConfig) -> Option<String> {
    if let Some(name) = &config.bot_name {
        return Some(name.clone());
    }
    match client.get_me().await {
        Ok(me) => {
            debug!(bot = ?me.username, "Resolved bot name");
            me.username
        }
        Err(e) => {
            warn!(error = %e, "Could not look up bot name; chat registration links disabled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener as StdListener;
    use std::time::Duration;

    use super::*;
    use crate::config::ConfigError;
    use crate::notify::telegram::tests::{FakeBotApi, spawn_fake_api};
    use crate::store::UserStore;
    use crate::user::UserIdentity;

    fn test_config(name: &str) -> Config {
        // A port nobody listens on, so every sensor read fails fast.
        let closed = StdListener::bind("127.0.0.1:0").unwrap();
        let sensor_port = closed.local_addr().unwrap().port();
        drop(closed);

        let mut config = Config::default();
        config.sensor.host = "127.0.0.1".to_string();
        config.sensor.port = sensor_port;
        config.api.listen = "127.0.0.1:0".parse().unwrap();
        config.database.path = std::env::temp_dir()
            .join(format!("laundrymeter-{}-{name}", std::process::id()))
            .join("db.sqlite");
        config
    }

    #[tokio::test]
    async fn serves_health_and_stops_on_shutdown() {
        let config = test_config("health");
        let db_dir = config.database.path.parent().unwrap().to_path_buf();

        let daemon = Daemon::build(config).await.unwrap();
        let addr = daemon.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(daemon.run(shutdown.clone()));

        let response = reqwest::get(format!("http://{addr}/api/v0/health"))
            .await
            .unwrap();
        assert!(response.status().is_success());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();

        let _ = std::fs::remove_dir_all(db_dir);
    }

    #[tokio::test]
    async fn looks_up_bot_name_when_not_configured() {
        let mut config = test_config("botname");
        let db_dir = config.database.path.parent().unwrap().to_path_buf();
        let telegram = spawn_fake_api(FakeBotApi::default()).await;
        config.telegram = Some(TelegramConfig {
            bot_name: None,
            ..telegram
        });

        let daemon = Daemon::build(config).await.unwrap();
        assert!(daemon.bot.is_some());
        // Same file through a second connection.
        let ada = SqliteStore::open(&db_dir.join("db.sqlite"))
            .unwrap()
            .upsert_user(&UserIdentity {
                username: "ada".to_string(),
                name: "Ada".to_string(),
                email: "ada@example.org".to_string(),
            })
            .unwrap();
        let link = daemon.state.service.issue_chat_link(&ada).unwrap();
        assert!(link.starts_with("https://t.me/laundry_bot?start="), "{link}");

        let _ = std::fs::remove_dir_all(db_dir);
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let mut config = test_config("invalid");
        config.poller.interval_secs = 0;
        assert!(matches!(
            Daemon::build(config).await,
            Err(Error::Config(ConfigError::Invalid(_)))
        ));
    }

    #[tokio::test]
    async fn occupied_listen_address_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config("bind");
        let db_dir = config.database.path.parent().unwrap().to_path_buf();
        config.api.listen = taken.local_addr().unwrap();

        assert!(matches!(
            Daemon::build(config).await,
            Err(Error::Bind { .. })
        ));

        let _ = std::fs::remove_dir_all(db_dir);
    }
}
