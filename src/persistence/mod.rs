//! Persistence Port: a narrow transactional query interface the core
//! uses. No ORM; only declared query shapes, one struct wrapping a
//! `sqlx::SqlitePool`, hand-written SQL, async methods returning
//! `crate::Result<T>`.

mod sqlite;
pub mod types;

pub use sqlite::{SqlitePersistence, DDL};
pub use types::*;

use crate::error::{PersistenceError, Result};
use crate::{ChannelId, GuildEventId, GuildId, MessageId, RoleId, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Static trait for persistence backends.
pub trait Persistence: Send + Sync + 'static {
    // -- Maintenance sweeps (spec.md §4.3, §6) --

    fn delete_expired_sessions(&self, now: DateTime<Utc>) -> impl Future<Output = Result<u64>> + Send;
    fn delete_expired_invites(&self, now: DateTime<Utc>) -> impl Future<Output = Result<u64>> + Send;
    fn delete_expired_bans(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<(GuildId, UserId)>>> + Send;
    fn delete_expired_key_packages(&self, now: DateTime<Utc>) -> impl Future<Output = Result<u64>> + Send;
    fn delete_stale_push_subscriptions(
        &self,
        older_than: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn due_bookmarks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<DueBookmark>>> + Send;
    fn mark_bookmark_reminded(
        &self,
        user_id: &UserId,
        message_id: &MessageId,
    ) -> impl Future<Output = Result<()>> + Send;

    fn upcoming_events_needing_reminder(
        &self,
        reminder_type: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<UpcomingGuildEvent>>> + Send;
    fn event_rsvp_user_ids(
        &self,
        event_id: &GuildEventId,
    ) -> impl Future<Output = Result<Vec<UserId>>> + Send;
    /// Insert `(event_id, reminder_type)` into the reminder log with
    /// conflict ignored. Returns `true` iff this call performed the
    /// insert — the exactly-once-per-type mechanism (spec.md §4.3).
    fn insert_event_reminder_log(
        &self,
        event_id: &GuildEventId,
        reminder_type: &str,
        sent_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool>> + Send;

    // -- Automod (spec.md §4.2, §6) --

    fn load_guild_rules(&self, guild_id: &GuildId) -> impl Future<Output = Result<Vec<AutomodRule>>> + Send;
    fn insert_action_record(
        &self,
        record: NewActionRecord,
    ) -> impl Future<Output = Result<ActionRecord>> + Send;
    fn delete_message(&self, message_id: &MessageId) -> impl Future<Output = Result<()>> + Send;
    fn set_member_timeout(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        until: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    // -- Notification fan-out / directory lookups (spec.md §4.4, §6) --

    fn dm_participants(&self, channel_id: &ChannelId) -> impl Future<Output = Result<Vec<UserId>>> + Send;
    fn role_member_ids(
        &self,
        guild_id: &GuildId,
        role_ids: &[RoleId],
    ) -> impl Future<Output = Result<Vec<UserId>>> + Send;
    fn guild_member_ids(&self, guild_id: &GuildId) -> impl Future<Output = Result<Vec<UserId>>> + Send;
    /// Roles held by one member, for the automod worker's exemption
    /// check (spec.md §4.2 `is_exempt`, §4.4 derived for event-sourced
    /// evaluation rather than the synchronous write path).
    fn member_role_ids(&self, guild_id: &GuildId, user_id: &UserId) -> impl Future<Output = Result<Vec<RoleId>>> + Send;
    fn guild_owner_id(&self, guild_id: &GuildId) -> impl Future<Output = Result<Option<UserId>>> + Send;
    fn message_author_ids(
        &self,
        message_ids: &[MessageId],
    ) -> impl Future<Output = Result<HashMap<MessageId, UserId>>> + Send;

    fn user_display(&self, user_id: &UserId) -> impl Future<Output = Result<Option<UserDisplay>>> + Send;
    fn guild_display(&self, guild_id: &GuildId) -> impl Future<Output = Result<Option<GuildDisplay>>> + Send;
    fn channel_display(
        &self,
        channel_id: &ChannelId,
    ) -> impl Future<Output = Result<Option<ChannelDisplay>>> + Send;

    // -- Notification CRUD (spec.md §3 `Notification`, §4.5) --

    fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> impl Future<Output = Result<Notification>> + Send;
}

/// Dynamic trait for runtime polymorphism: `Arc<dyn PersistenceDyn>` is
/// the handle type threaded through the Worker Manager, the Automod
/// Engine, and the Notification Derivation Pipeline.
pub trait PersistenceDyn: Send + Sync + 'static {
    fn delete_expired_sessions<'a>(
        &'a self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>>;
    fn delete_expired_invites<'a>(
        &'a self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>>;
    fn delete_expired_bans<'a>(
        &'a self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<(GuildId, UserId)>>> + Send + 'a>>;
    fn delete_expired_key_packages<'a>(
        &'a self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>>;
    fn delete_stale_push_subscriptions<'a>(
        &'a self,
        older_than: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>>;

    fn due_bookmarks<'a>(
        &'a self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DueBookmark>>> + Send + 'a>>;
    fn mark_bookmark_reminded<'a>(
        &'a self,
        user_id: &'a UserId,
        message_id: &'a MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn upcoming_events_needing_reminder<'a>(
        &'a self,
        reminder_type: &'a str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UpcomingGuildEvent>>> + Send + 'a>>;
    fn event_rsvp_user_ids<'a>(
        &'a self,
        event_id: &'a GuildEventId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UserId>>> + Send + 'a>>;
    fn insert_event_reminder_log<'a>(
        &'a self,
        event_id: &'a GuildEventId,
        reminder_type: &'a str,
        sent_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    fn load_guild_rules<'a>(
        &'a self,
        guild_id: &'a GuildId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AutomodRule>>> + Send + 'a>>;
    fn insert_action_record<'a>(
        &'a self,
        record: NewActionRecord,
    ) -> Pin<Box<dyn Future<Output = Result<ActionRecord>> + Send + 'a>>;
    fn delete_message<'a>(
        &'a self,
        message_id: &'a MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
    fn set_member_timeout<'a>(
        &'a self,
        guild_id: &'a GuildId,
        user_id: &'a UserId,
        until: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn dm_participants<'a>(
        &'a self,
        channel_id: &'a ChannelId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UserId>>> + Send + 'a>>;
    fn role_member_ids<'a>(
        &'a self,
        guild_id: &'a GuildId,
        role_ids: &'a [RoleId],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UserId>>> + Send + 'a>>;
    fn guild_member_ids<'a>(
        &'a self,
        guild_id: &'a GuildId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UserId>>> + Send + 'a>>;
    fn member_role_ids<'a>(
        &'a self,
        guild_id: &'a GuildId,
        user_id: &'a UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RoleId>>> + Send + 'a>>;
    fn guild_owner_id<'a>(
        &'a self,
        guild_id: &'a GuildId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<UserId>>> + Send + 'a>>;
    fn message_author_ids<'a>(
        &'a self,
        message_ids: &'a [MessageId],
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<MessageId, UserId>>> + Send + 'a>>;

    fn user_display<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<UserDisplay>>> + Send + 'a>>;
    fn guild_display<'a>(
        &'a self,
        guild_id: &'a GuildId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<GuildDisplay>>> + Send + 'a>>;
    fn channel_display<'a>(
        &'a self,
        channel_id: &'a ChannelId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ChannelDisplay>>> + Send + 'a>>;

    fn insert_notification<'a>(
        &'a self,
        notification: NewNotification,
    ) -> Pin<Box<dyn Future<Output = Result<Notification>> + Send + 'a>>;
}

impl<T: Persistence> PersistenceDyn for T {
    fn delete_expired_sessions<'a>(
        &'a self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        Box::pin(Persistence::delete_expired_sessions(self, now))
    }
    fn delete_expired_invites<'a>(
        &'a self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        Box::pin(Persistence::delete_expired_invites(self, now))
    }
    fn delete_expired_bans<'a>(
        &'a self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<(GuildId, UserId)>>> + Send + 'a>> {
        Box::pin(Persistence::delete_expired_bans(self, now))
    }
    fn delete_expired_key_packages<'a>(
        &'a self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        Box::pin(Persistence::delete_expired_key_packages(self, now))
    }
    fn delete_stale_push_subscriptions<'a>(
        &'a self,
        older_than: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        Box::pin(Persistence::delete_stale_push_subscriptions(self, older_than))
    }
    fn due_bookmarks<'a>(
        &'a self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DueBookmark>>> + Send + 'a>> {
        Box::pin(Persistence::due_bookmarks(self, now, limit))
    }
    fn mark_bookmark_reminded<'a>(
        &'a self,
        user_id: &'a UserId,
        message_id: &'a MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Persistence::mark_bookmark_reminded(self, user_id, message_id))
    }
    fn upcoming_events_needing_reminder<'a>(
        &'a self,
        reminder_type: &'a str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UpcomingGuildEvent>>> + Send + 'a>> {
        Box::pin(Persistence::upcoming_events_needing_reminder(
            self,
            reminder_type,
            window_start,
            window_end,
            limit,
        ))
    }
    fn event_rsvp_user_ids<'a>(
        &'a self,
        event_id: &'a GuildEventId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UserId>>> + Send + 'a>> {
        Box::pin(Persistence::event_rsvp_user_ids(self, event_id))
    }
    fn insert_event_reminder_log<'a>(
        &'a self,
        event_id: &'a GuildEventId,
        reminder_type: &'a str,
        sent_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(Persistence::insert_event_reminder_log(self, event_id, reminder_type, sent_at))
    }
    fn load_guild_rules<'a>(
        &'a self,
        guild_id: &'a GuildId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AutomodRule>>> + Send + 'a>> {
        Box::pin(Persistence::load_guild_rules(self, guild_id))
    }
    fn insert_action_record<'a>(
        &'a self,
        record: NewActionRecord,
    ) -> Pin<Box<dyn Future<Output = Result<ActionRecord>> + Send + 'a>> {
        Box::pin(Persistence::insert_action_record(self, record))
    }
    fn delete_message<'a>(
        &'a self,
        message_id: &'a MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Persistence::delete_message(self, message_id))
    }
    fn set_member_timeout<'a>(
        &'a self,
        guild_id: &'a GuildId,
        user_id: &'a UserId,
        until: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Persistence::set_member_timeout(self, guild_id, user_id, until))
    }
    fn dm_participants<'a>(
        &'a self,
        channel_id: &'a ChannelId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UserId>>> + Send + 'a>> {
        Box::pin(Persistence::dm_participants(self, channel_id))
    }
    fn role_member_ids<'a>(
        &'a self,
        guild_id: &'a GuildId,
        role_ids: &'a [RoleId],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UserId>>> + Send + 'a>> {
        Box::pin(Persistence::role_member_ids(self, guild_id, role_ids))
    }
    fn guild_member_ids<'a>(
        &'a self,
        guild_id: &'a GuildId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<UserId>>> + Send + 'a>> {
        Box::pin(Persistence::guild_member_ids(self, guild_id))
    }
    fn member_role_ids<'a>(
        &'a self,
        guild_id: &'a GuildId,
        user_id: &'a UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RoleId>>> + Send + 'a>> {
        Box::pin(Persistence::member_role_ids(self, guild_id, user_id))
    }
    fn guild_owner_id<'a>(
        &'a self,
        guild_id: &'a GuildId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<UserId>>> + Send + 'a>> {
        Box::pin(Persistence::guild_owner_id(self, guild_id))
    }
    fn message_author_ids<'a>(
        &'a self,
        message_ids: &'a [MessageId],
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<MessageId, UserId>>> + Send + 'a>> {
        Box::pin(Persistence::message_author_ids(self, message_ids))
    }
    fn user_display<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<UserDisplay>>> + Send + 'a>> {
        Box::pin(Persistence::user_display(self, user_id))
    }
    fn guild_display<'a>(
        &'a self,
        guild_id: &'a GuildId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<GuildDisplay>>> + Send + 'a>> {
        Box::pin(Persistence::guild_display(self, guild_id))
    }
    fn channel_display<'a>(
        &'a self,
        channel_id: &'a ChannelId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ChannelDisplay>>> + Send + 'a>> {
        Box::pin(Persistence::channel_display(self, channel_id))
    }
    fn insert_notification<'a>(
        &'a self,
        notification: NewNotification,
    ) -> Pin<Box<dyn Future<Output = Result<Notification>> + Send + 'a>> {
        Box::pin(Persistence::insert_notification(self, notification))
    }
}

pub(crate) fn query_error(context: &str, error: sqlx::Error) -> crate::Error {
    PersistenceError::Query(format!("{context}: {error}")).into()
}
