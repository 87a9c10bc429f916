use std::sync::Arc;

use futures::future::join_all;

use super::{Delivery, Notification, NotificationSink, Recipient};
use crate::store::UserStore;
use crate::tracing::prelude::*;
use crate::user::Channel;

/// Per-channel summary of one notification round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelReport {
    pub channel: Channel,
    pub sent: usize,
    pub failed: usize,
    /// Subscribers with no address on this channel.
    pub skipped: usize,
}

impl ChannelReport {
    fn empty(channel: Channel) -> Self {
        Self {
            channel,
            sent: 0,
            failed: 0,
            skipped: 0,
        }
    }
}

/// Fans a completion message out to every subscribed user, once.
pub struct TransitionNotifier {
    users: Arc<dyn UserStore>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    notification: Notification,
}

impl TransitionNotifier {
    pub fn new(users: Arc<dyn UserStore>, sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self {
            users,
            sinks,
            notification: Notification::laundry_ready(),
        }
    }

    /// A completion is a running to idle edge from a known previous state.
    pub fn is_completion(previous: Option<bool>, current: bool) -> bool {
        previous == Some(true) && !current
    }

    /// Notify everyone if `previous -> current` completes a run.
    pub async fn maybe_notify(
        &self,
        previous: Option<bool>,
        current: bool,
    ) -> Option<Vec<ChannelReport>> {
        if !Self::is_completion(previous, current) {
            return None;
        }
        Some(self.notify_all().await)
    }

    /// Drive every sink concurrently; one channel failing never affects another.
    pub async fn notify_all(&self) -> Vec<ChannelReport> {
        let rounds = self.sinks.iter().map(|sink| self.notify_channel(sink.as_ref()));
        let reports = join_all(rounds).await;

        for report in &reports {
            info!(
                channel = %report.channel,
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                "Completion notification round finished"
            );
        }
        reports
    }

    async fn notify_channel(&self, sink: &dyn NotificationSink) -> ChannelReport {
        let channel = sink.channel();
        let mut report = ChannelReport::empty(channel);

        let subscribers = match self.users.subscribers(channel) {
            Ok(subscribers) => subscribers,
            Err(e) => {
                error!(%channel, error = %e, "Failed to load subscribers");
                return report;
            }
        };

        let mut recipients = Vec::with_capacity(subscribers.len());
        for user in subscribers {
            match user.address(channel) {
                Some(address) => recipients.push(Recipient {
                    identity: user.identity.clone(),
                    address: address.to_string(),
                    revision: user.revision(channel),
                }),
                None => {
                    debug!(%channel, user = %user.identity, "Subscriber has no address, skipping");
                    report.skipped += 1;
                }
            }
        }

        if recipients.is_empty() {
            return report;
        }

        let deliveries = sink.send_batch(recipients, &self.notification).await;
        for Delivery { recipient, result } in deliveries {
            match result {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!(%channel, user = %recipient.identity, error = %e, "Notification failed");
                    report.failed += 1;
                }
            }

            // Attempted counts as notified.
            match self
                .users
                .consume_subscription(&recipient.identity, channel, recipient.revision)
            {
                Ok(true) => {}
                Ok(false) => debug!(
                    %channel,
                    user = %recipient.identity,
                    "Preference changed during notification, keeping it"
                ),
                Err(e) => error!(
                    %channel,
                    user = %recipient.identity,
                    error = %e,
                    "Failed to clear notification flag"
                ),
            }
        }

        report
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::notify::NotificationError;
    use crate::store::SqliteStore;
    use crate::user::UserIdentity;

    /// Sink that records deliveries and fails for chosen addresses.
    pub(crate) struct RecordingSink {
        channel: Channel,
        failing: Vec<String>,
        log: Mutex<Vec<String>>,
        on_send: Option<Box<dyn Fn(&str) + Send + Sync>>,
    }

    impl RecordingSink {
        pub(crate) fn new(channel: Channel) -> Self {
            Self {
                channel,
                failing: Vec::new(),
                log: Mutex::new(Vec::new()),
                on_send: None,
            }
        }

        fn failing_for(mut self, address: &str) -> Self {
            self.failing.push(address.to_string());
            self
        }

        fn on_send(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
            self.on_send = Some(Box::new(hook));
            self
        }

        pub(crate) fn sent(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(
            &self,
            address: &str,
            _notification: &Notification,
        ) -> Result<(), NotificationError> {
            if let Some(hook) = &self.on_send {
                hook(address);
            }
            self.log.lock().push(address.to_string());
            if self.failing.iter().any(|a| a == address) {
                return Err(NotificationError::Transport("connection reset".to_string()));
            }
            Ok(())
        }
    }

    pub(crate) fn add_user(store: &SqliteStore, name: &str, email: bool, chat: bool) {
        store
            .upsert_user(&UserIdentity {
                username: name.to_string(),
                name: name.to_uppercase(),
                email: format!("{name}@example.org"),
            })
            .unwrap();
        if chat {
            let token = format!("token-{name}");
            store.set_chat_token(name, &token).unwrap();
            store.bind_chat_address(&token, &format!("chat-{name}")).unwrap();
            store.set_preference(name, Channel::Chat, true).unwrap();
        }
        if email {
            store.set_preference(name, Channel::Email, true).unwrap();
        }
    }

    #[test]
    fn completion_requires_known_running_predecessor() {
        assert!(TransitionNotifier::is_completion(Some(true), false));
        assert!(!TransitionNotifier::is_completion(Some(false), false));
        assert!(!TransitionNotifier::is_completion(Some(true), true));
        assert!(!TransitionNotifier::is_completion(Some(false), true));
        assert!(!TransitionNotifier::is_completion(None, false));
    }

    #[tokio::test]
    async fn notifies_each_subscriber_once_per_channel() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        add_user(&store, "a", true, false);
        add_user(&store, "b", false, true);
        add_user(&store, "c", false, false);

        let email = Arc::new(RecordingSink::new(Channel::Email));
        let chat = Arc::new(RecordingSink::new(Channel::Chat));
        let notifier =
            TransitionNotifier::new(store.clone(), vec![email.clone(), chat.clone()]);

        let reports = notifier.maybe_notify(Some(true), false).await.unwrap();
        assert_eq!(reports.len(), 2);

        assert_eq!(email.sent(), vec!["a@example.org"]);
        assert_eq!(chat.sent(), vec!["chat-b"]);

        assert!(!store.user("a").unwrap().unwrap().wants_email);
        assert!(!store.user("b").unwrap().unwrap().wants_chat);

        // Nobody left waiting: a second edge contacts no one.
        notifier.maybe_notify(Some(true), false).await.unwrap();
        assert_eq!(email.sent().len(), 1);
        assert_eq!(chat.sent().len(), 1);
    }

    #[tokio::test]
    async fn no_edge_no_notification() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        add_user(&store, "a", true, false);
        let email = Arc::new(RecordingSink::new(Channel::Email));
        let notifier = TransitionNotifier::new(store.clone(), vec![email.clone()]);

        assert!(notifier.maybe_notify(Some(false), false).await.is_none());
        assert!(notifier.maybe_notify(None, false).await.is_none());
        assert!(email.sent().is_empty());
        assert!(store.user("a").unwrap().unwrap().wants_email);
    }

    #[tokio::test]
    async fn failed_delivery_still_consumes_and_batch_continues() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        add_user(&store, "a", true, false);
        add_user(&store, "b", true, false);
        add_user(&store, "c", true, false);

        let email = Arc::new(RecordingSink::new(Channel::Email).failing_for("b@example.org"));
        let notifier = TransitionNotifier::new(store.clone(), vec![email.clone()]);

        let reports = notifier.notify_all().await;
        assert_eq!(
            reports,
            vec![ChannelReport {
                channel: Channel::Email,
                sent: 2,
                failed: 1,
                skipped: 0,
            }]
        );
        assert_eq!(email.sent().len(), 3);
        assert!(store.subscribers(Channel::Email).unwrap().is_empty());
    }

    #[tokio::test]
    async fn re_enable_during_send_is_not_lost() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        add_user(&store, "a", true, false);

        let racing = store.clone();
        let email = Arc::new(RecordingSink::new(Channel::Email).on_send(move |_| {
            racing.set_preference("a", Channel::Email, true).unwrap();
        }));
        let notifier = TransitionNotifier::new(store.clone(), vec![email.clone()]);

        notifier.notify_all().await;
        assert_eq!(email.sent().len(), 1);
        assert!(store.user("a").unwrap().unwrap().wants_email);
    }

    #[tokio::test]
    async fn other_channel_change_during_send_still_consumes() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        add_user(&store, "a", true, true);

        let racing = store.clone();
        let email = Arc::new(RecordingSink::new(Channel::Email).on_send(move |_| {
            racing.set_preference("a", Channel::Chat, false).unwrap();
        }));
        let notifier = TransitionNotifier::new(store.clone(), vec![email.clone()]);

        notifier.notify_all().await;
        assert_eq!(email.sent().len(), 1);
        assert!(!store.user("a").unwrap().unwrap().wants_email);

        notifier.notify_all().await;
        assert_eq!(email.sent().len(), 1);
    }

    #[tokio::test]
    async fn failing_channel_does_not_affect_other_channel() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        add_user(&store, "a", true, true);

        let email = Arc::new(RecordingSink::new(Channel::Email).failing_for("a@example.org"));
        let chat = Arc::new(RecordingSink::new(Channel::Chat));
        let notifier =
            TransitionNotifier::new(store.clone(), vec![email.clone(), chat.clone()]);

        notifier.notify_all().await;
        assert_eq!(chat.sent(), vec!["chat-a"]);
        let user = store.user("a").unwrap().unwrap();
        assert!(!user.wants_email);
        assert!(!user.wants_chat);
    }
}
