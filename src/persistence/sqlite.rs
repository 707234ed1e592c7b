//! SQLite-backed `Persistence` implementation: one struct wrapping a
//! `sqlx::SqlitePool`, hand-written SQL (no query builder, no ORM), row
//! structs mapped with `sqlx::FromRow` where the shape matches, manual
//! mapping otherwise.

use super::query_error;
use super::types::{
    ActionRecord, AutomodRule, ChannelDisplay, DueBookmark, GuildDisplay, NewActionRecord, NewNotification,
    Notification, UpcomingGuildEvent, UserDisplay,
};
use super::Persistence;
use crate::error::Result;
use crate::{ChannelId, GuildEventId, GuildId, MessageId, RoleId, UserId};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

/// The full schema this crate expects of its SQLite database. Shared by
/// production startup and by in-memory test fixtures so the two never
/// drift apart.
pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS invites (
    code TEXT PRIMARY KEY,
    guild_id TEXT NOT NULL,
    expires_at TEXT
);

CREATE TABLE IF NOT EXISTS guild_bans (
    guild_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    expires_at TEXT,
    PRIMARY KEY (guild_id, user_id)
);

CREATE TABLE IF NOT EXISTS mls_key_packages (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS push_subscriptions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    last_seen_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS message_bookmarks (
    user_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    remind_at TEXT,
    reminded INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user_id, message_id)
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    channel_id TEXT NOT NULL,
    author_id TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS guild_events (
    id TEXT PRIMARY KEY,
    guild_id TEXT NOT NULL,
    name TEXT NOT NULL,
    scheduled_start TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS guild_event_rsvps (
    event_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (event_id, user_id)
);

CREATE TABLE IF NOT EXISTS event_reminder_log (
    event_id TEXT NOT NULL,
    reminder_type TEXT NOT NULL,
    sent_at TEXT NOT NULL,
    PRIMARY KEY (event_id, reminder_type)
);

CREATE TABLE IF NOT EXISTS automod_rules (
    id TEXT PRIMARY KEY,
    guild_id TEXT NOT NULL,
    name TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    rule_type TEXT NOT NULL,
    config TEXT NOT NULL,
    action TEXT NOT NULL,
    timeout_duration_seconds INTEGER,
    exempt_channel_ids TEXT NOT NULL DEFAULT '[]',
    exempt_role_ids TEXT NOT NULL DEFAULT '[]',
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS automod_action_records (
    id TEXT PRIMARY KEY,
    guild_id TEXT NOT NULL,
    rule_id TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    action TEXT NOT NULL,
    reason TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS guild_members (
    guild_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    timeout_until TEXT,
    PRIMARY KEY (guild_id, user_id)
);

CREATE TABLE IF NOT EXISTS guild_member_roles (
    guild_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role_id TEXT NOT NULL,
    PRIMARY KEY (guild_id, user_id, role_id)
);

CREATE TABLE IF NOT EXISTS guilds (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    icon_id TEXT,
    owner_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS channels (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dm_participants (
    channel_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (channel_id, user_id)
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    avatar_id TEXT
);

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    notification_type TEXT NOT NULL,
    guild_id TEXT,
    guild_name TEXT,
    guild_icon_id TEXT,
    channel_id TEXT,
    channel_name TEXT,
    message_id TEXT,
    actor_id TEXT NOT NULL,
    actor_name TEXT NOT NULL,
    actor_avatar_id TEXT,
    content TEXT,
    metadata TEXT,
    created_at TEXT NOT NULL,
    read INTEGER NOT NULL DEFAULT 0
);
"#;

#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and apply the DDL. Used by `main.rs`; test fixtures call
    /// `sqlx::query(DDL)` directly against an in-memory pool instead.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await.map_err(|error| query_error("connect", error))?;
        sqlx::query(DDL).execute(&pool).await.map_err(|error| query_error("apply schema", error))?;
        Ok(Self { pool })
    }
}

fn parse_string_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

impl Persistence for SqlitePersistence {
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|error| query_error("delete_expired_sessions", error))?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_invites(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM invites WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|error| query_error("delete_expired_invites", error))?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_bans(&self, now: DateTime<Utc>) -> Result<Vec<(GuildId, UserId)>> {
        let rows = sqlx::query("SELECT guild_id, user_id FROM guild_bans WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now.to_rfc3339())
            .fetch_all(&self.pool)
            .await
            .map_err(|error| query_error("select_expired_bans", error))?;

        let expired: Vec<(GuildId, UserId)> =
            rows.iter().map(|row| (row.get::<String, _>("guild_id"), row.get::<String, _>("user_id"))).collect();

        sqlx::query("DELETE FROM guild_bans WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|error| query_error("delete_expired_bans", error))?;

        Ok(expired)
    }

    async fn delete_expired_key_packages(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM mls_key_packages WHERE expires_at <= ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|error| query_error("delete_expired_key_packages", error))?;
        Ok(result.rows_affected())
    }

    async fn delete_stale_push_subscriptions(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM push_subscriptions WHERE last_seen_at <= ?")
            .bind(older_than.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|error| query_error("delete_stale_push_subscriptions", error))?;
        Ok(result.rows_affected())
    }

    async fn due_bookmarks(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<DueBookmark>> {
        let rows = sqlx::query(
            r#"
            SELECT b.user_id AS user_id, b.message_id AS message_id, m.channel_id AS channel_id,
                   m.content AS message_content
            FROM message_bookmarks b
            JOIN messages m ON m.id = b.message_id
            WHERE b.remind_at IS NOT NULL AND b.remind_at <= ? AND b.reminded = 0
            ORDER BY b.remind_at ASC
            LIMIT ?
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| query_error("due_bookmarks", error))?;

        Ok(rows
            .iter()
            .map(|row| DueBookmark {
                user_id: row.get("user_id"),
                message_id: row.get("message_id"),
                channel_id: row.get("channel_id"),
                message_content: row.get("message_content"),
            })
            .collect())
    }

    async fn mark_bookmark_reminded(&self, user_id: &UserId, message_id: &MessageId) -> Result<()> {
        sqlx::query("UPDATE message_bookmarks SET reminded = 1 WHERE user_id = ? AND message_id = ?")
            .bind(user_id)
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(|error| query_error("mark_bookmark_reminded", error))?;
        Ok(())
    }

    async fn upcoming_events_needing_reminder(
        &self,
        reminder_type: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UpcomingGuildEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id AS event_id, e.guild_id AS guild_id, e.name AS name, e.scheduled_start AS scheduled_start
            FROM guild_events e
            WHERE e.scheduled_start > ? AND e.scheduled_start <= ?
              AND NOT EXISTS (
                  SELECT 1 FROM event_reminder_log l
                  WHERE l.event_id = e.id AND l.reminder_type = ?
              )
            ORDER BY e.scheduled_start ASC
            LIMIT ?
            "#,
        )
        .bind(window_start.to_rfc3339())
        .bind(window_end.to_rfc3339())
        .bind(reminder_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| query_error("upcoming_events_needing_reminder", error))?;

        rows.iter()
            .map(|row| {
                let scheduled_start: String = row.get("scheduled_start");
                Ok(UpcomingGuildEvent {
                    event_id: row.get("event_id"),
                    guild_id: row.get("guild_id"),
                    name: row.get("name"),
                    scheduled_start: DateTime::parse_from_rfc3339(&scheduled_start)
                        .map_err(|error| query_error("parse scheduled_start", sqlx::Error::Decode(Box::new(error))))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }

    async fn event_rsvp_user_ids(&self, event_id: &GuildEventId) -> Result<Vec<UserId>> {
        let rows = sqlx::query("SELECT user_id FROM guild_event_rsvps WHERE event_id = ?")
            .bind(event_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| query_error("event_rsvp_user_ids", error))?;
        Ok(rows.iter().map(|row| row.get("user_id")).collect())
    }

    async fn insert_event_reminder_log(
        &self,
        event_id: &GuildEventId,
        reminder_type: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO event_reminder_log (event_id, reminder_type, sent_at) VALUES (?, ?, ?)",
        )
        .bind(event_id)
        .bind(reminder_type)
        .bind(sent_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|error| query_error("insert_event_reminder_log", error))?;
        Ok(result.rows_affected() == 1)
    }

    async fn load_guild_rules(&self, guild_id: &GuildId) -> Result<Vec<AutomodRule>> {
        let rows = sqlx::query(
            r#"
            SELECT id, guild_id, name, enabled, rule_type, config, action, timeout_duration_seconds,
                   exempt_channel_ids, exempt_role_ids, created_by, created_at, updated_at
            FROM automod_rules
            WHERE guild_id = ? AND enabled = 1
            ORDER BY created_at ASC
            "#,
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| query_error("load_guild_rules", error))?;

        rows.iter()
            .map(|row| {
                let config_raw: String = row.get("config");
                let created_at: String = row.get("created_at");
                let updated_at: String = row.get("updated_at");
                let exempt_channel_ids: String = row.get("exempt_channel_ids");
                let exempt_role_ids: String = row.get("exempt_role_ids");
                Ok(AutomodRule {
                    id: row.get("id"),
                    guild_id: row.get("guild_id"),
                    name: row.get("name"),
                    enabled: row.get::<i64, _>("enabled") != 0,
                    rule_type: row.get("rule_type"),
                    config: serde_json::from_str(&config_raw).unwrap_or(serde_json::Value::Null),
                    action: row.get("action"),
                    timeout_duration_seconds: row.get("timeout_duration_seconds"),
                    exempt_channel_ids: parse_string_list(&exempt_channel_ids),
                    exempt_role_ids: parse_string_list(&exempt_role_ids),
                    created_by: row.get("created_by"),
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map_err(|error| query_error("parse created_at", sqlx::Error::Decode(Box::new(error))))?
                        .with_timezone(&Utc),
                    updated_at: DateTime::parse_from_rfc3339(&updated_at)
                        .map_err(|error| query_error("parse updated_at", sqlx::Error::Decode(Box::new(error))))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }

    async fn insert_action_record(&self, record: NewActionRecord) -> Result<ActionRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO automod_action_records
                (id, guild_id, rule_id, channel_id, message_id, user_id, action, reason, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&record.guild_id)
        .bind(&record.rule_id)
        .bind(&record.channel_id)
        .bind(&record.message_id)
        .bind(&record.user_id)
        .bind(&record.action)
        .bind(&record.reason)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|error| query_error("insert_action_record", error))?;

        Ok(ActionRecord {
            id,
            guild_id: record.guild_id,
            rule_id: record.rule_id,
            channel_id: record.channel_id,
            message_id: record.message_id,
            user_id: record.user_id,
            action: record.action,
            reason: record.reason,
            created_at,
        })
    }

    async fn delete_message(&self, message_id: &MessageId) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(|error| query_error("delete_message", error))?;
        Ok(())
    }

    async fn set_member_timeout(&self, guild_id: &GuildId, user_id: &UserId, until: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE guild_members SET timeout_until = ? WHERE guild_id = ? AND user_id = ?")
            .bind(until.to_rfc3339())
            .bind(guild_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|error| query_error("set_member_timeout", error))?;
        Ok(())
    }

    async fn dm_participants(&self, channel_id: &ChannelId) -> Result<Vec<UserId>> {
        let rows = sqlx::query("SELECT user_id FROM dm_participants WHERE channel_id = ?")
            .bind(channel_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| query_error("dm_participants", error))?;
        Ok(rows.iter().map(|row| row.get("user_id")).collect())
    }

    async fn role_member_ids(&self, guild_id: &GuildId, role_ids: &[RoleId]) -> Result<Vec<UserId>> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = role_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT DISTINCT user_id FROM guild_member_roles WHERE guild_id = ? AND role_id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(guild_id);
        for role_id in role_ids {
            query = query.bind(role_id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(|error| query_error("role_member_ids", error))?;
        Ok(rows.iter().map(|row| row.get("user_id")).collect())
    }

    async fn guild_member_ids(&self, guild_id: &GuildId) -> Result<Vec<UserId>> {
        let rows = sqlx::query("SELECT user_id FROM guild_members WHERE guild_id = ?")
            .bind(guild_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| query_error("guild_member_ids", error))?;
        Ok(rows.iter().map(|row| row.get("user_id")).collect())
    }

    async fn member_role_ids(&self, guild_id: &GuildId, user_id: &UserId) -> Result<Vec<RoleId>> {
        let rows = sqlx::query("SELECT role_id FROM guild_member_roles WHERE guild_id = ? AND user_id = ?")
            .bind(guild_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| query_error("member_role_ids", error))?;
        Ok(rows.iter().map(|row| row.get("role_id")).collect())
    }

    async fn guild_owner_id(&self, guild_id: &GuildId) -> Result<Option<UserId>> {
        let row = sqlx::query("SELECT owner_id FROM guilds WHERE id = ?")
            .bind(guild_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| query_error("guild_owner_id", error))?;
        Ok(row.map(|row| row.get("owner_id")))
    }

    async fn message_author_ids(&self, message_ids: &[MessageId]) -> Result<HashMap<MessageId, UserId>> {
        if message_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = message_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!("SELECT id, author_id FROM messages WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for message_id in message_ids {
            query = query.bind(message_id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(|error| query_error("message_author_ids", error))?;
        Ok(rows.iter().map(|row| (row.get::<String, _>("id"), row.get::<String, _>("author_id"))).collect())
    }

    async fn user_display(&self, user_id: &UserId) -> Result<Option<UserDisplay>> {
        let row = sqlx::query("SELECT name, avatar_id FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| query_error("user_display", error))?;
        Ok(row.map(|row| UserDisplay { name: row.get("name"), avatar_id: row.get("avatar_id") }))
    }

    async fn guild_display(&self, guild_id: &GuildId) -> Result<Option<GuildDisplay>> {
        let row = sqlx::query("SELECT name, icon_id FROM guilds WHERE id = ?")
            .bind(guild_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| query_error("guild_display", error))?;
        Ok(row.map(|row| GuildDisplay { name: row.get("name"), icon_id: row.get("icon_id") }))
    }

    async fn channel_display(&self, channel_id: &ChannelId) -> Result<Option<ChannelDisplay>> {
        let row = sqlx::query("SELECT name FROM channels WHERE id = ?")
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| query_error("channel_display", error))?;
        Ok(row.map(|row| ChannelDisplay { name: row.get("name") }))
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let metadata_raw = notification.metadata.as_ref().map(|value| value.to_string());

        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, user_id, notification_type, guild_id, guild_name, guild_icon_id, channel_id, channel_name,
                 message_id, actor_id, actor_name, actor_avatar_id, content, metadata, created_at, read)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&id)
        .bind(&notification.user_id)
        .bind(&notification.notification_type)
        .bind(&notification.guild_id)
        .bind(&notification.guild_name)
        .bind(&notification.guild_icon_id)
        .bind(&notification.channel_id)
        .bind(&notification.channel_name)
        .bind(&notification.message_id)
        .bind(&notification.actor_id)
        .bind(&notification.actor_name)
        .bind(&notification.actor_avatar_id)
        .bind(&notification.content)
        .bind(&metadata_raw)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|error| query_error("insert_notification", error))?;

        Ok(Notification {
            id,
            user_id: notification.user_id,
            notification_type: notification.notification_type,
            created_at,
            read: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::types::{NewActionRecord, NewNotification};
    use chrono::Duration;

    async fn test_db() -> SqlitePersistence {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(DDL).execute(&pool).await.unwrap();
        SqlitePersistence::new(pool)
    }

    #[tokio::test]
    async fn delete_expired_bans_returns_and_removes_rows() {
        let db = test_db().await;
        let now = Utc::now();
        sqlx::query("INSERT INTO guild_bans (guild_id, user_id, expires_at) VALUES ('g1', 'u1', ?)")
            .bind((now - Duration::hours(1)).to_rfc3339())
            .execute(&db.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO guild_bans (guild_id, user_id, expires_at) VALUES ('g1', 'u2', NULL)")
            .execute(&db.pool)
            .await
            .unwrap();

        let expired = db.delete_expired_bans(now).await.unwrap();
        assert_eq!(expired, vec![("g1".to_string(), "u1".to_string())]);

        let remaining = db.guild_member_ids(&"g1".to_string()).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn insert_event_reminder_log_is_exactly_once() {
        let db = test_db().await;
        let now = Utc::now();
        let first = db.insert_event_reminder_log(&"e1".to_string(), "1h", now).await.unwrap();
        let second = db.insert_event_reminder_log(&"e1".to_string(), "1h", now).await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn due_bookmarks_excludes_already_reminded() {
        let db = test_db().await;
        let now = Utc::now();
        sqlx::query("INSERT INTO messages (id, channel_id, author_id, content) VALUES ('m1', 'c1', 'u1', 'hi')")
            .execute(&db.pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO message_bookmarks (user_id, message_id, channel_id, remind_at, reminded) VALUES ('u2', 'm1', 'c1', ?, 0)",
        )
        .bind((now - Duration::minutes(1)).to_rfc3339())
        .execute(&db.pool)
        .await
        .unwrap();

        let due = db.due_bookmarks(now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message_content, "hi");

        db.mark_bookmark_reminded(&"u2".to_string(), &"m1".to_string()).await.unwrap();
        let due_again = db.due_bookmarks(now, 10).await.unwrap();
        assert!(due_again.is_empty());
    }

    #[tokio::test]
    async fn insert_action_record_round_trips() {
        let db = test_db().await;
        let record = NewActionRecord {
            guild_id: "g1".to_string(),
            rule_id: "r1".to_string(),
            channel_id: "c1".to_string(),
            message_id: "m1".to_string(),
            user_id: "u1".to_string(),
            action: "delete_message".to_string(),
            reason: "spam rule".to_string(),
        };
        let saved = db.insert_action_record(record).await.unwrap();
        assert_eq!(saved.action, "delete_message");
    }

    #[tokio::test]
    async fn insert_notification_defaults_unread() {
        let db = test_db().await;
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
            content: Some("hello".to_string()),
            metadata: None,
        };
        let saved = db.insert_notification(notification).await.unwrap();
        assert!(!saved.read);
    }
}
