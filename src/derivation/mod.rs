//! Notification Derivation Pipeline (spec.md §4.4): consumers of
//! event-bus subjects that derive persistent notifications for the
//! correct recipient set, honoring per-user preferences.
//!
//! Each handler runs independently; a persistence failure is logged and
//! processing continues rather than propagating — derivation is
//! at-least-once and downstream creation is idempotent by convention
//! (spec.md §4.4 "Failure semantics").

use crate::error::Result;
use crate::events::{
    AutomodActionData, ChannelPinsUpdateData, EventEnvelope, GuildBanAddData, GuildMemberAddData,
    GuildMemberRemoveData, MessageCreateData, MessageReactionAddData, RelationshipAddData, RelationshipUpdateData,
};
use crate::notifications::NotificationsPortDyn;
use crate::persistence::{GuildDisplay, NewNotification, PersistenceDyn, UserDisplay};
use crate::{ChannelId, GuildId, UserId};
use std::collections::HashSet;

const CONTENT_TRUNCATE: usize = 200;

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

async fn actor_display(persistence: &dyn PersistenceDyn, user_id: &UserId) -> (String, Option<String>) {
    match persistence.user_display(user_id).await {
        Ok(Some(UserDisplay { name, avatar_id })) => (name, avatar_id),
        _ => (user_id.clone(), None),
    }
}

async fn guild_display(persistence: &dyn PersistenceDyn, guild_id: &GuildId) -> (Option<String>, Option<String>) {
    match persistence.guild_display(guild_id).await {
        Ok(Some(GuildDisplay { name, icon_id })) => (Some(name), icon_id),
        _ => (None, None),
    }
}

async fn channel_name(persistence: &dyn PersistenceDyn, channel_id: &ChannelId) -> Option<String> {
    persistence.channel_display(channel_id).await.ok().flatten().map(|display| display.name)
}

/// `MESSAGE_CREATE`: skip silent or empty messages, build three disjoint
/// recipient sets (dm, reply, mention) in priority order, and notify
/// each after the preference gate (spec.md §4.4 "MESSAGE_CREATE
/// derivation").
pub async fn handle_message_create(
    envelope: &EventEnvelope,
    persistence: &dyn PersistenceDyn,
    notifications: &dyn NotificationsPortDyn,
) -> Result<()> {
    let data: MessageCreateData = match envelope.decode("amityvox.message.create") {
        Ok(data) => data,
        Err(error) => {
            tracing::warn!(%error, "failed to decode MESSAGE_CREATE, dropping");
            return Ok(());
        }
    };

    if data.flags.silent || data.content.trim().is_empty() {
        return Ok(());
    }

    let is_dm = data.guild_id.is_empty();
    let (actor_name, actor_avatar_id) = actor_display(persistence, &data.author_id).await;
    let (guild_name, guild_icon_id) = if is_dm { (None, None) } else { guild_display(persistence, &data.guild_id).await };
    let channel_name = channel_name(persistence, &data.channel_id).await;
    let content = truncate(&data.content, CONTENT_TRUNCATE);

    let mut already_notified: HashSet<UserId> = HashSet::new();
    already_notified.insert(data.author_id.clone());

    // 1. dm-recipients.
    let dm_recipients: Vec<UserId> = if is_dm {
        match persistence.dm_participants(&data.channel_id).await {
            Ok(participants) => participants.into_iter().filter(|user_id| !already_notified.contains(user_id)).collect(),
            Err(error) => {
                tracing::debug!(%error, "failed to load dm participants");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };
    already_notified.extend(dm_recipients.iter().cloned());

    // 2. reply-recipients: the open question's resolution is zero
    // recipients unless `reply_to_ids` is populated.
    let reply_recipients: Vec<UserId> = if data.reply_to_ids.is_empty() {
        Vec::new()
    } else {
        match persistence.message_author_ids(&data.reply_to_ids).await {
            Ok(authors) => authors
                .into_values()
                .collect::<HashSet<_>>()
                .into_iter()
                .filter(|user_id| !already_notified.contains(user_id))
                .collect(),
            Err(error) => {
                tracing::debug!(%error, "failed to load reply recipients");
                Vec::new()
            }
        }
    };
    already_notified.extend(reply_recipients.iter().cloned());

    // 3. mention-recipients: explicit mentions ∪ mentioned-role members ∪
    // (mention_here ? guild members : ∅), filtered to build a new set
    // rather than mutated while iterating (spec.md §9 REDESIGN FLAGS
    // item 3).
    let mut mention_candidates: HashSet<UserId> = data.mention_user_ids.iter().cloned().collect();
    if !is_dm && !data.mention_role_ids.is_empty() {
        if let Ok(role_members) = persistence.role_member_ids(&data.guild_id, &data.mention_role_ids).await {
            mention_candidates.extend(role_members);
        }
    }
    if !is_dm && data.mention_here {
        if let Ok(guild_members) = persistence.guild_member_ids(&data.guild_id).await {
            mention_candidates.extend(guild_members);
        }
    }
    let mention_recipients: Vec<UserId> =
        mention_candidates.into_iter().filter(|user_id| !already_notified.contains(user_id)).collect();

    for (recipients, notification_type, is_mention, is_dm_flag) in [
        (&dm_recipients, "dm", false, is_dm),
        (&reply_recipients, "reply", false, false),
        (&mention_recipients, "mention", true, false),
    ] {
        for user_id in recipients {
            if !notifications.should_notify(user_id, Some(&data.guild_id), Some(&data.channel_id), is_mention, is_dm_flag, data.mention_here).await {
                continue;
            }
            let notification = NewNotification {
                user_id: user_id.clone(),
                notification_type: notification_type.to_string(),
                guild_id: if is_dm { None } else { Some(data.guild_id.clone()) },
                guild_name: guild_name.clone(),
                guild_icon_id: guild_icon_id.clone(),
                channel_id: Some(data.channel_id.clone()),
                channel_name: channel_name.clone(),
                message_id: Some(data.id.clone()),
                actor_id: data.author_id.clone(),
                actor_name: actor_name.clone(),
                actor_avatar_id: actor_avatar_id.clone(),
                content: Some(content.clone()),
                metadata: None,
            };
            if let Err(error) = notifications.create_notification(notification).await {
                tracing::debug!(%error, %user_id, notification_type, "failed to create notification");
            }
        }
    }

    Ok(())
}

/// `MESSAGE_REACTION_ADD`: notify the message author when a different
/// user reacts (spec.md §4.4 "Reaction").
pub async fn handle_reaction_add(
    envelope: &EventEnvelope,
    persistence: &dyn PersistenceDyn,
    notifications: &dyn NotificationsPortDyn,
) -> Result<()> {
    let data: MessageReactionAddData = match envelope.decode("amityvox.message.reaction_add") {
        Ok(data) => data,
        Err(error) => {
            tracing::warn!(%error, "failed to decode MESSAGE_REACTION_ADD, dropping");
            return Ok(());
        }
    };

    let authors = persistence.message_author_ids(std::slice::from_ref(&data.message_id)).await?;
    let Some(author_id) = authors.get(&data.message_id) else { return Ok(()) };
    if author_id == &data.user_id {
        return Ok(());
    }

    if !notifications.should_notify(author_id, Some(&data.guild_id), Some(&data.channel_id), false, false, false).await {
        return Ok(());
    }

    let (actor_name, actor_avatar_id) = actor_display(persistence, &data.user_id).await;
    let notification = NewNotification {
        user_id: author_id.clone(),
        notification_type: "reaction".to_string(),
        guild_id: if data.guild_id.is_empty() { None } else { Some(data.guild_id.clone()) },
        guild_name: None,
        guild_icon_id: None,
        channel_id: Some(data.channel_id.clone()),
        channel_name: None,
        message_id: Some(data.message_id.clone()),
        actor_id: data.user_id.clone(),
        actor_name,
        actor_avatar_id,
        content: None,
        metadata: Some(serde_json::json!({ "emoji": data.emoji })),
    };
    if let Err(error) = notifications.create_notification(notification).await {
        tracing::debug!(%error, "failed to create reaction notification");
    }
    Ok(())
}

/// `CHANNEL_PINS_UPDATE`: notify the message's author when someone else
/// pins it (spec.md §4.4 "Pin").
pub async fn handle_pins_update(
    envelope: &EventEnvelope,
    persistence: &dyn PersistenceDyn,
    notifications: &dyn NotificationsPortDyn,
) -> Result<()> {
    let data: ChannelPinsUpdateData = match envelope.decode("amityvox.channel.pins_update") {
        Ok(data) => data,
        Err(error) => {
            tracing::warn!(%error, "failed to decode CHANNEL_PINS_UPDATE, dropping");
            return Ok(());
        }
    };

    let authors = persistence.message_author_ids(std::slice::from_ref(&data.message_id)).await?;
    let Some(author_id) = authors.get(&data.message_id) else { return Ok(()) };
    if author_id == &data.pinned_by {
        return Ok(());
    }

    if !notifications.should_notify(author_id, Some(&data.guild_id), Some(&data.channel_id), false, false, false).await {
        return Ok(());
    }

    let (actor_name, actor_avatar_id) = actor_display(persistence, &data.pinned_by).await;
    let notification = NewNotification {
        user_id: author_id.clone(),
        notification_type: "pin".to_string(),
        guild_id: if data.guild_id.is_empty() { None } else { Some(data.guild_id.clone()) },
        guild_name: None,
        guild_icon_id: None,
        channel_id: Some(data.channel_id.clone()),
        channel_name: None,
        message_id: Some(data.message_id.clone()),
        actor_id: data.pinned_by.clone(),
        actor_name,
        actor_avatar_id,
        content: None,
        metadata: None,
    };
    if let Err(error) = notifications.create_notification(notification).await {
        tracing::debug!(%error, "failed to create pin notification");
    }
    Ok(())
}

/// `RELATIONSHIP_ADD`: only on `type = "pending_incoming"` notify the
/// target (spec.md §4.4 "Relationship-add").
pub async fn handle_relationship_add(
    envelope: &EventEnvelope,
    persistence: &dyn PersistenceDyn,
    notifications: &dyn NotificationsPortDyn,
) -> Result<()> {
    let data: RelationshipAddData = match envelope.decode("amityvox.relationship.add") {
        Ok(data) => data,
        Err(error) => {
            tracing::warn!(%error, "failed to decode RELATIONSHIP_ADD, dropping");
            return Ok(());
        }
    };
    if data.relationship_type != "pending_incoming" {
        return Ok(());
    }

    if !notifications.should_notify(&data.target_id, None, None, false, false, false).await {
        return Ok(());
    }

    let (actor_name, actor_avatar_id) = actor_display(persistence, &data.requester_id).await;
    let notification = NewNotification {
        user_id: data.target_id.clone(),
        notification_type: "friend_request".to_string(),
        guild_id: None,
        guild_name: None,
        guild_icon_id: None,
        channel_id: None,
        channel_name: None,
        message_id: None,
        actor_id: data.requester_id.clone(),
        actor_name,
        actor_avatar_id,
        content: None,
        metadata: None,
    };
    if let Err(error) = notifications.create_notification(notification).await {
        tracing::debug!(%error, "failed to create friend request notification");
    }
    Ok(())
}

/// `RELATIONSHIP_UPDATE`: when the relationship becomes `friend`, notify
/// the requester that their request was accepted (spec.md §4.4
/// "Relationship-update").
pub async fn handle_relationship_update(
    envelope: &EventEnvelope,
    persistence: &dyn PersistenceDyn,
    notifications: &dyn NotificationsPortDyn,
) -> Result<()> {
    let data: RelationshipUpdateData = match envelope.decode("amityvox.relationship.update") {
        Ok(data) => data,
        Err(error) => {
            tracing::warn!(%error, "failed to decode RELATIONSHIP_UPDATE, dropping");
            return Ok(());
        }
    };
    if data.relationship_type != "friend" {
        return Ok(());
    }

    if !notifications.should_notify(&data.requester_id, None, None, false, false, false).await {
        return Ok(());
    }

    let (actor_name, actor_avatar_id) = actor_display(persistence, &data.target_id).await;
    let notification = NewNotification {
        user_id: data.requester_id.clone(),
        notification_type: "friend_accepted".to_string(),
        guild_id: None,
        guild_name: None,
        guild_icon_id: None,
        channel_id: None,
        channel_name: None,
        message_id: None,
        actor_id: data.target_id.clone(),
        actor_name,
        actor_avatar_id,
        content: None,
        metadata: None,
    };
    if let Err(error) = notifications.create_notification(notification).await {
        tracing::debug!(%error, "failed to create friend-accepted notification");
    }
    Ok(())
}

/// `GUILD_MEMBER_ADD`: notify the guild owner if it isn't the joining
/// user (spec.md §4.4 "Member-add").
pub async fn handle_member_add(
    envelope: &EventEnvelope,
    persistence: &dyn PersistenceDyn,
    notifications: &dyn NotificationsPortDyn,
) -> Result<()> {
    let data: GuildMemberAddData = match envelope.decode("amityvox.guild.member_add") {
        Ok(data) => data,
        Err(error) => {
            tracing::warn!(%error, "failed to decode GUILD_MEMBER_ADD, dropping");
            return Ok(());
        }
    };

    let Some(owner_id) = persistence.guild_owner_id(&data.guild_id).await? else { return Ok(()) };
    if owner_id == data.user_id {
        return Ok(());
    }

    if !notifications.should_notify(&owner_id, Some(&data.guild_id), None, false, false, false).await {
        return Ok(());
    }

    let (actor_name, actor_avatar_id) = actor_display(persistence, &data.user_id).await;
    let (guild_name, guild_icon_id) = guild_display(persistence, &data.guild_id).await;
    let notification = NewNotification {
        user_id: owner_id,
        notification_type: "member_join".to_string(),
        guild_id: Some(data.guild_id.clone()),
        guild_name,
        guild_icon_id,
        channel_id: None,
        channel_name: None,
        message_id: None,
        actor_id: data.user_id.clone(),
        actor_name,
        actor_avatar_id,
        content: None,
        metadata: None,
    };
    if let Err(error) = notifications.create_notification(notification).await {
        tracing::debug!(%error, "failed to create member-join notification");
    }
    Ok(())
}

/// `GUILD_BAN_ADD`: notify the banned user, actor "system" if no
/// `banned_by` (spec.md §4.4 "Ban").
pub async fn handle_ban_add(
    envelope: &EventEnvelope,
    persistence: &dyn PersistenceDyn,
    notifications: &dyn NotificationsPortDyn,
) -> Result<()> {
    let data: GuildBanAddData = match envelope.decode("amityvox.guild.ban_add") {
        Ok(data) => data,
        Err(error) => {
            tracing::warn!(%error, "failed to decode GUILD_BAN_ADD, dropping");
            return Ok(());
        }
    };

    if !notifications.should_notify(&data.user_id, Some(&data.guild_id), None, false, false, false).await {
        return Ok(());
    }

    let (actor_id, actor_name, actor_avatar_id) = match &data.banned_by {
        Some(banned_by) => {
            let (name, avatar) = actor_display(persistence, banned_by).await;
            (banned_by.clone(), name, avatar)
        }
        None => ("system".to_string(), "system".to_string(), None),
    };
    let (guild_name, guild_icon_id) = guild_display(persistence, &data.guild_id).await;

    let notification = NewNotification {
        user_id: data.user_id.clone(),
        notification_type: "ban".to_string(),
        guild_id: Some(data.guild_id.clone()),
        guild_name,
        guild_icon_id,
        channel_id: None,
        channel_name: None,
        message_id: None,
        actor_id,
        actor_name,
        actor_avatar_id,
        content: None,
        metadata: None,
    };
    if let Err(error) = notifications.create_notification(notification).await {
        tracing::debug!(%error, "failed to create ban notification");
    }
    Ok(())
}

/// `GUILD_MEMBER_REMOVE`: only notify when `kicked_by` is present —
/// voluntary leaves are silent (spec.md §4.4 "Member-remove").
pub async fn handle_member_remove(
    envelope: &EventEnvelope,
    persistence: &dyn PersistenceDyn,
    notifications: &dyn NotificationsPortDyn,
) -> Result<()> {
    let data: GuildMemberRemoveData = match envelope.decode("amityvox.guild.member_remove") {
        Ok(data) => data,
        Err(error) => {
            tracing::warn!(%error, "failed to decode GUILD_MEMBER_REMOVE, dropping");
            return Ok(());
        }
    };
    let Some(kicked_by) = data.kicked_by.filter(|id| !id.is_empty()) else { return Ok(()) };

    if !notifications.should_notify(&data.user_id, Some(&data.guild_id), None, false, false, false).await {
        return Ok(());
    }

    let (actor_name, actor_avatar_id) = actor_display(persistence, &kicked_by).await;
    let (guild_name, guild_icon_id) = guild_display(persistence, &data.guild_id).await;
    let notification = NewNotification {
        user_id: data.user_id.clone(),
        notification_type: "kick".to_string(),
        guild_id: Some(data.guild_id.clone()),
        guild_name,
        guild_icon_id,
        channel_id: None,
        channel_name: None,
        message_id: None,
        actor_id: kicked_by,
        actor_name,
        actor_avatar_id,
        content: None,
        metadata: None,
    };
    if let Err(error) = notifications.create_notification(notification).await {
        tracing::debug!(%error, "failed to create kick notification");
    }
    Ok(())
}

/// `AUTOMOD_ACTION`: maps `warn → warned`, `timeout → muted`; other
/// actions produce no notification (spec.md §4.4 "Automod"). Actor is
/// fixed to "AutoMod". Per Open Question 2, `delete` publishes
/// `MESSAGE_DELETE` instead of `AUTOMOD_ACTION`, so this handler never
/// sees delete actions.
pub async fn handle_automod_action(
    envelope: &EventEnvelope,
    _persistence: &dyn PersistenceDyn,
    notifications: &dyn NotificationsPortDyn,
) -> Result<()> {
    let data: AutomodActionData = match envelope.decode("amityvox.automod.action") {
        Ok(data) => data,
        Err(error) => {
            tracing::warn!(%error, "failed to decode AUTOMOD_ACTION, dropping");
            return Ok(());
        }
    };

    let notification_type = match data.action.as_str() {
        "warn" => "warned",
        "mute" | "timeout" => "muted",
        _ => return Ok(()),
    };

    if !notifications.should_notify(&data.user_id, Some(&data.guild_id), Some(&data.channel_id), false, false, false).await {
        return Ok(());
    }

    let notification = NewNotification {
        user_id: data.user_id.clone(),
        notification_type: notification_type.to_string(),
        guild_id: Some(data.guild_id.clone()),
        guild_name: None,
        guild_icon_id: None,
        channel_id: Some(data.channel_id.clone()),
        channel_name: None,
        message_id: Some(data.message_id.clone()),
        actor_id: "automod".to_string(),
        actor_name: "AutoMod".to_string(),
        actor_avatar_id: None,
        content: Some(data.reason.clone()),
        metadata: None,
    };
    if let Err(error) = notifications.create_notification(notification).await {
        tracing::debug!(%error, "failed to create automod notification");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MessageCreateData, MessageFlags};
    use crate::notifications::{AllowAllPreferences, LoggingDeliveryPort, NotificationService};
    use crate::persistence::SqlitePersistence;
    use sqlx::SqlitePool;
    use std::sync::Arc;

    async fn test_deps() -> (SqlitePool, SqlitePersistence, NotificationService) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(crate::persistence::DDL).execute(&pool).await.unwrap();
        let persistence = SqlitePersistence::new(pool.clone());
        let service = NotificationService::new(
            Arc::new(SqlitePersistence::new(pool.clone())),
            Arc::new(AllowAllPreferences),
            Arc::new(LoggingDeliveryPort),
            true,
        );
        (pool, persistence, service)
    }

    fn message_create(overrides: impl FnOnce(&mut MessageCreateData)) -> EventEnvelope {
        let mut data = MessageCreateData {
            id: "m1".into(),
            channel_id: "c1".into(),
            guild_id: String::new(),
            author_id: "u1".into(),
            content: "hi".into(),
            flags: MessageFlags::default(),
            mention_user_ids: vec![],
            mention_role_ids: vec![],
            mention_here: false,
            reply_to_ids: vec![],
            message_type: "default".into(),
            thread_id: None,
        };
        overrides(&mut data);
        EventEnvelope::new("MESSAGE_CREATE", &data).unwrap()
    }

    #[tokio::test]
    async fn dm_message_notifies_other_participants_not_author() {
        let (pool, persistence, service) = test_deps().await;
        sqlx::query("INSERT INTO dm_participants (channel_id, user_id) VALUES ('c1','u1'), ('c1','u2'), ('c1','u3')")
            .execute(&pool)
            .await
            .unwrap();

        let envelope = message_create(|_| {});
        handle_message_create(&envelope, &persistence, &service).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE notification_type = 'dm'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let self_notified: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = 'u1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(self_notified, 0);
    }

    #[tokio::test]
    async fn silent_message_yields_no_notifications() {
        let (pool, persistence, service) = test_deps().await;
        sqlx::query("INSERT INTO dm_participants (channel_id, user_id) VALUES ('c1','u1'), ('c1','u2')")
            .execute(&pool)
            .await
            .unwrap();

        let envelope = message_create(|data| data.flags.silent = true);
        handle_message_create(&envelope, &persistence, &service).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn member_remove_is_silent_without_kicked_by() {
        let (pool, persistence, service) = test_deps().await;
        let data = GuildMemberRemoveData { guild_id: "g1".into(), user_id: "u1".into(), kicked_by: None };
        let envelope = EventEnvelope::new("GUILD_MEMBER_REMOVE", &data).unwrap();
        handle_member_remove(&envelope, &persistence, &service).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn automod_warn_maps_to_warned() {
        let (pool, persistence, service) = test_deps().await;
        let data = AutomodActionData {
            guild_id: "g1".into(),
            rule_id: "r1".into(),
            channel_id: "c1".into(),
            message_id: "m1".into(),
            user_id: "u1".into(),
            action: "warn".into(),
            reason: "spam".into(),
        };
        let envelope = EventEnvelope::new("AUTOMOD_ACTION", &data).unwrap();
        handle_automod_action(&envelope, &persistence, &service).await.unwrap();

        let notification_type: String =
            sqlx::query_scalar("SELECT notification_type FROM notifications WHERE user_id = 'u1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(notification_type, "warned");
    }
}
