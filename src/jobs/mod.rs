//! Maintenance Jobs: periodic job bodies as free functions over
//! `&dyn ...Dyn` ports, so the Worker Manager's `Start` stays a flat
//! registration list rather than inlining job logic. Orchestration
//! (scheduling, cancellation) lives in `worker_manager/`; execution
//! lives here.

use crate::broker::{publish_event, BrokerDyn};
use crate::error::Result;
use crate::events::{subjects, GuildBanRemoveData};
use crate::notifications::{NotificationsPortDyn, PushPayload};
use crate::persistence::PersistenceDyn;
use crate::search::SearchPortDyn;
use chrono::{Duration, Utc};

const REMINDER_BATCH_LIMIT: i64 = 50;
const DEFAULT_BOOKMARK_BODY: &str = "You have a bookmark reminder.";
const NOTIFICATION_CONTENT_TRUNCATE: usize = 200;

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Deletes expired sessions (spec.md §4.3 session-cleanup).
pub async fn session_cleanup(persistence: &dyn PersistenceDyn) -> Result<()> {
    let deleted = persistence.delete_expired_sessions(Utc::now()).await?;
    if deleted > 0 {
        tracing::info!(worker = "session-cleanup", deleted, "swept expired sessions");
    }
    Ok(())
}

/// Deletes invites with a finite, expired `expires_at` (spec.md §4.3
/// invite-cleanup).
pub async fn invite_cleanup(persistence: &dyn PersistenceDyn) -> Result<()> {
    let deleted = persistence.delete_expired_invites(Utc::now()).await?;
    if deleted > 0 {
        tracing::info!(worker = "invite-cleanup", deleted, "swept expired invites");
    }
    Ok(())
}

/// Deletes expired bans and emits `GUILD_BAN_REMOVE` for each
/// (spec.md §4.3 ban-cleanup, §8 invariant "ban expiry fan-out").
pub async fn ban_cleanup(persistence: &dyn PersistenceDyn, broker: &dyn BrokerDyn) -> Result<()> {
    let expired = persistence.delete_expired_bans(Utc::now()).await?;
    if expired.is_empty() {
        return Ok(());
    }
    tracing::info!(worker = "ban-cleanup", count = expired.len(), "swept expired bans");
    for (guild_id, user_id) in expired {
        let data = GuildBanRemoveData { guild_id: guild_id.clone(), user_id: user_id.clone() };
        if let Err(error) = publish_event(broker, subjects::GUILD_BAN_REMOVE, "GUILD_BAN_REMOVE", data).await {
            tracing::warn!(worker = "ban-cleanup", %guild_id, %user_id, %error, "failed to publish GUILD_BAN_REMOVE");
        }
    }
    Ok(())
}

/// Deletes expired MLS key packages (spec.md §4.3 mls-key-cleanup).
pub async fn mls_key_cleanup(persistence: &dyn PersistenceDyn) -> Result<()> {
    let deleted = persistence.delete_expired_key_packages(Utc::now()).await?;
    if deleted > 0 {
        tracing::info!(worker = "mls-key-cleanup", deleted, "swept expired MLS key packages");
    }
    Ok(())
}

/// Deletes push subscriptions older than the configured max age
/// (spec.md §4.3 push-sub-cleanup: "90 days, no recent use").
pub async fn push_sub_cleanup(notifications: &dyn NotificationsPortDyn, max_age_days: i64) -> Result<()> {
    let deleted = notifications.cleanup_stale_subscriptions(Duration::days(max_age_days)).await?;
    if deleted > 0 {
        tracing::info!(worker = "push-sub-cleanup", deleted, "swept stale push subscriptions");
    }
    Ok(())
}

/// Scans due bookmarks and sends a reminder for each, pre-acking
/// `reminded = true` before send to prevent double-sends on later
/// failure (spec.md §4.3 bookmark-reminders, §8 "bookmark idempotence").
pub async fn bookmark_reminders(persistence: &dyn PersistenceDyn, notifications: &dyn NotificationsPortDyn) -> Result<()> {
    let due = persistence.due_bookmarks(Utc::now(), REMINDER_BATCH_LIMIT).await?;
    if due.is_empty() {
        return Ok(());
    }
    tracing::info!(worker = "bookmark-reminders", count = due.len(), "sending bookmark reminders");

    for bookmark in due {
        if let Err(error) = persistence.mark_bookmark_reminded(&bookmark.user_id, &bookmark.message_id).await {
            tracing::warn!(worker = "bookmark-reminders", user_id = %bookmark.user_id, %error, "failed to mark bookmark reminded, skipping send");
            continue;
        }

        let body = if bookmark.message_content.trim().is_empty() {
            DEFAULT_BOOKMARK_BODY.to_string()
        } else {
            truncate(&bookmark.message_content, 200)
        };
        let payload = PushPayload {
            notification_type: "bookmark_reminder".to_string(),
            title: "Bookmark reminder".to_string(),
            body,
            channel_id: Some(bookmark.channel_id),
            guild_id: None,
            message_id: Some(bookmark.message_id),
        };
        if let Err(error) = notifications.send_to_user(&bookmark.user_id, &payload).await {
            tracing::warn!(worker = "bookmark-reminders", user_id = %bookmark.user_id, %error, "push delivery failed");
        }
    }
    Ok(())
}

/// Two sweeps per tick (window = 15 minutes and 1 hour): selects
/// upcoming events with at least one RSVP and no existing log row for
/// `(event_id, reminder_type)`, sends a push to every RSVP'd user, then
/// inserts the log row with conflict ignored for exactly-once-per-type
/// semantics under concurrency (spec.md §4.3 event-reminders, §8
/// "exactly-one reminder per (event, type)").
pub async fn event_reminders(persistence: &dyn PersistenceDyn, notifications: &dyn NotificationsPortDyn) -> Result<()> {
    run_event_reminder_sweep(persistence, notifications, "15min", Duration::minutes(15)).await?;
    run_event_reminder_sweep(persistence, notifications, "1h", Duration::hours(1)).await?;
    Ok(())
}

async fn run_event_reminder_sweep(
    persistence: &dyn PersistenceDyn,
    notifications: &dyn NotificationsPortDyn,
    reminder_type: &str,
    window: Duration,
) -> Result<()> {
    let now = Utc::now();
    let events = persistence.upcoming_events_needing_reminder(reminder_type, now, now + window, REMINDER_BATCH_LIMIT).await?;

    for event in events {
        let rsvp_user_ids = persistence.event_rsvp_user_ids(&event.event_id).await?;
        if rsvp_user_ids.is_empty() {
            continue;
        }

        for user_id in &rsvp_user_ids {
            let payload = PushPayload {
                notification_type: "event_reminder".to_string(),
                title: "Upcoming event".to_string(),
                body: truncate(&event.name, NOTIFICATION_CONTENT_TRUNCATE),
                channel_id: None,
                guild_id: Some(event.guild_id.clone()),
                message_id: None,
            };
            if let Err(error) = notifications.send_to_user(user_id, &payload).await {
                tracing::warn!(worker = "event-reminders", %reminder_type, event_id = %event.event_id, %user_id, %error, "push delivery failed");
            }
        }

        let inserted = persistence.insert_event_reminder_log(&event.event_id, reminder_type, now).await?;
        if inserted {
            tracing::info!(worker = "event-reminders", %reminder_type, event_id = %event.event_id, recipients = rsvp_user_ids.len(), "sent event reminder");
        }
    }
    Ok(())
}

/// Incremental search sync with a 10-minute look-back window
/// (spec.md §4.3 search-sync).
pub async fn search_sync(search: &dyn SearchPortDyn) -> Result<()> {
    let since = Utc::now() - Duration::minutes(10);
    let synced = search.sync_since(since).await?;
    if synced > 0 {
        tracing::info!(worker = "search-sync", synced, "synced search index");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::events::subjects as event_subjects;
    use crate::notifications::{AllowAllPreferences, LoggingDeliveryPort, NotificationService};
    use crate::persistence::SqlitePersistence;
    use sqlx::SqlitePool;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    async fn test_db() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(crate::persistence::DDL).execute(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn ban_cleanup_emits_one_event_per_expired_ban() {
        let pool = test_db().await;
        sqlx::query("INSERT INTO guild_bans (guild_id, user_id, expires_at) VALUES ('g1', 'u7', '2020-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .unwrap();
        let persistence = SqlitePersistence::new(pool);
        let broker = InMemoryBroker::new();

        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter_for_handler = counter.clone();
        let _handle = broker.subscribe(
            event_subjects::GUILD_BAN_REMOVE,
            Arc::new(move |_subject, _envelope| {
                let counter = counter_for_handler.clone();
                Box::pin(async move {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        ban_cleanup(&persistence, &broker).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bookmark_reminders_only_sends_once() {
        let pool = test_db().await;
        sqlx::query("INSERT INTO messages (id, channel_id, author_id, content) VALUES ('m1', 'c1', 'u1', '')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO message_bookmarks (user_id, message_id, channel_id, remind_at, reminded) VALUES ('u2', 'm1', 'c1', '2020-01-01T00:00:00Z', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let persistence = SqlitePersistence::new(pool.clone());
        let service = NotificationService::new(
            Arc::new(SqlitePersistence::new(pool)),
            Arc::new(AllowAllPreferences),
            Arc::new(LoggingDeliveryPort),
            true,
        );

        bookmark_reminders(&persistence, &service).await.unwrap();
        let due_after = persistence.due_bookmarks(Utc::now(), 50).await.unwrap();
        assert!(due_after.is_empty());
    }

    #[tokio::test]
    async fn event_reminders_are_exactly_once_per_type() {
        let pool = test_db().await;
        let scheduled_start = (Utc::now() + Duration::minutes(10)).to_rfc3339();
        sqlx::query("INSERT INTO guild_events (id, guild_id, name, scheduled_start) VALUES ('e1', 'g1', 'Town Hall', ?)")
            .bind(&scheduled_start)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO guild_event_rsvps (event_id, user_id) VALUES ('e1', 'u1'), ('e1', 'u2'), ('e1', 'u3')")
            .execute(&pool)
            .await
            .unwrap();

        let persistence = SqlitePersistence::new(pool.clone());
        let service = NotificationService::new(
            Arc::new(SqlitePersistence::new(pool.clone())),
            Arc::new(AllowAllPreferences),
            Arc::new(LoggingDeliveryPort),
            true,
        );

        event_reminders(&persistence, &service).await.unwrap();
        event_reminders(&persistence, &service).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM event_reminder_log WHERE event_id = 'e1' AND reminder_type = '15min'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }
}
