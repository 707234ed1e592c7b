//! Row types returned by the Persistence Port (spec.md §3, §6).

use crate::{ChannelId, GuildEventId, GuildId, MessageId, RuleId, UserId};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// A due bookmark reminder, joined from `message_bookmarks` and
/// `messages` (spec.md §6).
#[derive(Debug, Clone)]
pub struct DueBookmark {
    pub user_id: UserId,
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub message_content: String,
}

/// An upcoming scheduled guild event selected by the reminder sweep
/// (spec.md §4.3 event-reminders).
#[derive(Debug, Clone)]
pub struct UpcomingGuildEvent {
    pub event_id: GuildEventId,
    pub guild_id: GuildId,
    pub name: String,
    pub scheduled_start: DateTime<Utc>,
}

/// A loaded automod rule (spec.md §3 `AutomodRule`).
#[derive(Debug, Clone)]
pub struct AutomodRule {
    pub id: RuleId,
    pub guild_id: GuildId,
    pub name: String,
    pub enabled: bool,
    pub rule_type: String,
    pub config: Value,
    pub action: String,
    pub timeout_duration_seconds: Option<i64>,
    pub exempt_channel_ids: Vec<ChannelId>,
    pub exempt_role_ids: Vec<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A new automod action audit row to insert (spec.md §3 `ActionRecord`).
#[derive(Debug, Clone)]
pub struct NewActionRecord {
    pub guild_id: GuildId,
    pub rule_id: RuleId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub action: String,
    pub reason: String,
}

/// A persisted automod action audit row.
#[derive(Debug, Clone)]
pub struct ActionRecord {
    pub id: String,
    pub guild_id: GuildId,
    pub rule_id: RuleId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub action: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Display metadata for a user, looked up for notification enrichment
/// (spec.md §4.4 "looks up display metadata").
#[derive(Debug, Clone)]
pub struct UserDisplay {
    pub name: String,
    pub avatar_id: Option<String>,
}

/// Display metadata for a guild.
#[derive(Debug, Clone)]
pub struct GuildDisplay {
    pub name: String,
    pub icon_id: Option<String>,
}

/// Display metadata for a channel.
#[derive(Debug, Clone)]
pub struct ChannelDisplay {
    pub name: String,
}

/// A new persistent notification to insert (spec.md §3 `Notification`).
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: UserId,
    pub notification_type: String,
    pub guild_id: Option<GuildId>,
    pub guild_name: Option<String>,
    pub guild_icon_id: Option<String>,
    pub channel_id: Option<ChannelId>,
    pub channel_name: Option<String>,
    pub message_id: Option<MessageId>,
    pub actor_id: UserId,
    pub actor_name: String,
    pub actor_avatar_id: Option<String>,
    pub content: Option<String>,
    pub metadata: Option<Value>,
}

/// A persisted notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: String,
    pub user_id: UserId,
    pub notification_type: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}
