//! `NotificationsPort`: the dependency contract workers and the
//! derivation pipeline call into (spec.md §4.5). The pipeline itself
//! never touches persistence or delivery directly.

use super::delivery::{DeliveryPortDyn, PushPayload};
use super::preferences::PreferencesPortDyn;
use crate::error::Result;
use crate::persistence::{NewNotification, Notification, PersistenceDyn};
use crate::{ChannelId, GuildId, UserId};
use chrono::Duration;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub trait NotificationsPort: Send + Sync + 'static {
    fn create_notification(&self, notification: NewNotification) -> impl Future<Output = Result<Notification>> + Send;

    fn should_notify(
        &self,
        user_id: &UserId,
        guild_id: Option<&GuildId>,
        channel_id: Option<&ChannelId>,
        is_mention: bool,
        is_dm: bool,
        is_here: bool,
    ) -> impl Future<Output = bool> + Send;

    fn send_to_user(&self, user_id: &UserId, payload: &PushPayload) -> impl Future<Output = Result<()>> + Send;

    fn cleanup_stale_subscriptions(&self, max_age: Duration) -> impl Future<Output = Result<u64>> + Send;

    fn enabled(&self) -> bool;
}

pub trait NotificationsPortDyn: Send + Sync + 'static {
    fn create_notification<'a>(&'a self, notification: NewNotification) -> Pin<Box<dyn Future<Output = Result<Notification>> + Send + 'a>>;

    fn should_notify<'a>(
        &'a self,
        user_id: &'a UserId,
        guild_id: Option<&'a GuildId>,
        channel_id: Option<&'a ChannelId>,
        is_mention: bool,
        is_dm: bool,
        is_here: bool,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    fn send_to_user<'a>(&'a self, user_id: &'a UserId, payload: &'a PushPayload) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn cleanup_stale_subscriptions<'a>(&'a self, max_age: Duration) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>>;

    fn enabled(&self) -> bool;
}

impl<T: NotificationsPort> NotificationsPortDyn for T {
    fn create_notification<'a>(&'a self, notification: NewNotification) -> Pin<Box<dyn Future<Output = Result<Notification>> + Send + 'a>> {
        Box::pin(NotificationsPort::create_notification(self, notification))
    }

    fn should_notify<'a>(
        &'a self,
        user_id: &'a UserId,
        guild_id: Option<&'a GuildId>,
        channel_id: Option<&'a ChannelId>,
        is_mention: bool,
        is_dm: bool,
        is_here: bool,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(NotificationsPort::should_notify(self, user_id, guild_id, channel_id, is_mention, is_dm, is_here))
    }

    fn send_to_user<'a>(&'a self, user_id: &'a UserId, payload: &'a PushPayload) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(NotificationsPort::send_to_user(self, user_id, payload))
    }

    fn cleanup_stale_subscriptions<'a>(&'a self, max_age: Duration) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        Box::pin(NotificationsPort::cleanup_stale_subscriptions(self, max_age))
    }

    fn enabled(&self) -> bool {
        NotificationsPort::enabled(self)
    }
}

/// Concrete notification service wiring persistence, a preference gate,
/// and a delivery adapter behind the one contract workers depend on.
pub struct NotificationService {
    persistence: Arc<dyn PersistenceDyn>,
    preferences: Arc<dyn PreferencesPortDyn>,
    delivery: Arc<dyn DeliveryPortDyn>,
    enabled: bool,
}

impl NotificationService {
    pub fn new(
        persistence: Arc<dyn PersistenceDyn>,
        preferences: Arc<dyn PreferencesPortDyn>,
        delivery: Arc<dyn DeliveryPortDyn>,
        enabled: bool,
    ) -> Self {
        Self { persistence, preferences, delivery, enabled }
    }
}

impl NotificationsPort for NotificationService {
    async fn create_notification(&self, notification: NewNotification) -> Result<Notification> {
        self.persistence.insert_notification(notification).await
    }

    async fn should_notify(
        &self,
        user_id: &UserId,
        guild_id: Option<&GuildId>,
        channel_id: Option<&ChannelId>,
        is_mention: bool,
        is_dm: bool,
        is_here: bool,
    ) -> bool {
        self.preferences.should_notify(user_id, guild_id, channel_id, is_mention, is_dm, is_here).await
    }

    async fn send_to_user(&self, user_id: &UserId, payload: &PushPayload) -> Result<()> {
        self.delivery.send_to_user(user_id, payload).await
    }

    async fn cleanup_stale_subscriptions(&self, max_age: Duration) -> Result<u64> {
        let older_than = chrono::Utc::now() - max_age;
        self.persistence.delete_stale_push_subscriptions(older_than).await
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::delivery::LoggingDeliveryPort;
    use crate::notifications::preferences::AllowAllPreferences;
    use crate::persistence::SqlitePersistence;
    use sqlx::SqlitePool;

    async fn test_service() -> NotificationService {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(crate::persistence::DDL).execute(&pool).await.unwrap();
        NotificationService::new(
            Arc::new(SqlitePersistence::new(pool)),
            Arc::new(AllowAllPreferences),
            Arc::new(LoggingDeliveryPort),
            true,
        )
    }

    #[tokio::test]
    async fn create_notification_round_trips() {
        let service = test_service().await;
        let notification = NewNotification {
            user_id: "u1".to_string(),
            notification_type: "mention".to_string(),
            guild_id: None,
            guild_name: None,
            guild_icon_id: None,
            channel_id: None,
            channel_name: None,
            message_id: None,
            actor_id: "u2".to_string(),
            actor_name: "Actor".to_string(),
            actor_avatar_id: None,
            content: Some("hi".to_string()),
            metadata: None,
        };
        let saved = NotificationsPort::create_notification(&service, notification).await.unwrap();
        assert_eq!(saved.notification_type, "mention");
        assert!(!saved.read);
    }

    #[tokio::test]
    async fn allow_all_preferences_always_notifies() {
        let service = test_service().await;
        assert!(NotificationsPort::should_notify(&service, &"u1".to_string(), None, None, true, false, false).await);
    }

    #[tokio::test]
    async fn send_to_user_via_logging_adapter_succeeds() {
        let service = test_service().await;
        let payload = PushPayload {
            notification_type: "mention".to_string(),
            title: "New mention".to_string(),
            body: "hi".to_string(),
            channel_id: None,
            guild_id: None,
            message_id: None,
        };
        NotificationsPort::send_to_user(&service, &"u1".to_string(), &payload).await.unwrap();
    }
}
