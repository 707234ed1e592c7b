//! Event envelope and the canonical subject registry (spec.md §3, §6).

use crate::error::BrokerError;
use crate::{ChannelId, GuildId, MessageId, RoleId, UserId};
use serde::{Deserialize, Serialize};

/// Canonical subject names (spec.md §6).
pub mod subjects {
    pub const MESSAGE_CREATE: &str = "amityvox.message.create";
    pub const MESSAGE_UPDATE: &str = "amityvox.message.update";
    pub const MESSAGE_DELETE: &str = "amityvox.message.delete";
    pub const MESSAGE_REACTION_ADD: &str = "amityvox.message.reaction_add";
    pub const CHANNEL_PINS_UPDATE: &str = "amityvox.channel.pins_update";
    pub const GUILD_BAN_ADD: &str = "amityvox.guild.ban_add";
    pub const GUILD_BAN_REMOVE: &str = "amityvox.guild.ban_remove";
    pub const GUILD_MEMBER_ADD: &str = "amityvox.guild.member_add";
    pub const GUILD_MEMBER_REMOVE: &str = "amityvox.guild.member_remove";
    pub const AUTOMOD_ACTION: &str = "amityvox.automod.action";
    pub const RELATIONSHIP_ADD: &str = "amityvox.relationship.add";
    pub const RELATIONSHIP_UPDATE: &str = "amityvox.relationship.update";
    pub const MEDIA_TRANSCODE: &str = "amityvox.media.transcode";
    pub const MEDIA_EMBED_UNFURL: &str = "amityvox.media.embed_unfurl";

    /// Wildcard subscribed by the search indexer: matches every message
    /// subject via the trailing `>` segment.
    pub const MESSAGE_WILDCARD: &str = "amityvox.message.>";
}

/// `{ type, data }` wrapper on every broker message (spec.md §3, §6).
/// Immutable from publication onward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, data: impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            event_type: event_type.into(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Decode `data` into a typed payload, returning `BrokerError::Decode`
    /// on mismatch rather than panicking — one bad message must not
    /// poison the stream.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self, subject: &str) -> Result<T, BrokerError> {
        serde_json::from_value(self.data.clone()).map_err(|error| BrokerError::Decode {
            subject: subject.to_string(),
            expected: std::any::type_name::<T>(),
            reason: error.to_string(),
        })
    }
}

/// Uppercase-snake event name from a subject's trailing segment, e.g.
/// `amityvox.message.create` -> `MESSAGE_CREATE` (spec.md §6).
pub fn event_name_for_subject(subject: &str) -> String {
    // The event name is every segment after the top-level "amityvox"
    // namespace, joined with '_' and upper-cased, e.g.
    // "amityvox.channel.pins_update" -> "CHANNEL_PINS_UPDATE".
    subject
        .split('.')
        .skip(1)
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

/// Payload for `MESSAGE_CREATE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCreateData {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: GuildId,
    pub author_id: UserId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub flags: MessageFlags,
    #[serde(default)]
    pub mention_user_ids: Vec<UserId>,
    #[serde(default)]
    pub mention_role_ids: Vec<RoleId>,
    #[serde(default)]
    pub mention_here: bool,
    #[serde(default)]
    pub reply_to_ids: Vec<MessageId>,
    #[serde(default)]
    pub message_type: String,
    pub thread_id: Option<ChannelId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageFlags {
    #[serde(default)]
    pub silent: bool,
}

/// Payload for `MESSAGE_DELETE`, published by the automod engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeleteData {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: GuildId,
}

/// Payload for `MESSAGE_REACTION_ADD`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReactionAddData {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub emoji: String,
}

/// Payload for `CHANNEL_PINS_UPDATE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPinsUpdateData {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: GuildId,
    pub pinned_by: UserId,
}

/// Payload for `RELATIONSHIP_ADD`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipAddData {
    pub requester_id: UserId,
    pub target_id: UserId,
    /// e.g. "pending_incoming", "pending_outgoing", "blocked".
    #[serde(rename = "type")]
    pub relationship_type: String,
}

/// Payload for `RELATIONSHIP_UPDATE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipUpdateData {
    pub requester_id: UserId,
    pub target_id: UserId,
    #[serde(rename = "type")]
    pub relationship_type: String,
}

/// Payload for `GUILD_MEMBER_ADD`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMemberAddData {
    pub guild_id: GuildId,
    pub user_id: UserId,
}

/// Payload for `GUILD_BAN_ADD`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildBanAddData {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub banned_by: Option<UserId>,
}

/// Payload for `GUILD_BAN_REMOVE`, published by the ban-cleanup job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildBanRemoveData {
    pub guild_id: GuildId,
    pub user_id: UserId,
}

/// Payload for `GUILD_MEMBER_REMOVE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMemberRemoveData {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub kicked_by: Option<UserId>,
}

/// Payload for `AUTOMOD_ACTION`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomodActionData {
    pub guild_id: GuildId,
    pub rule_id: String,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    /// "delete" | "warn" | "timeout" | "log".
    pub action: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_name_is_upper_snake_of_trailing_segments() {
        assert_eq!(event_name_for_subject(subjects::MESSAGE_CREATE), "MESSAGE_CREATE");
        assert_eq!(
            event_name_for_subject(subjects::CHANNEL_PINS_UPDATE),
            "CHANNEL_PINS_UPDATE"
        );
        assert_eq!(
            event_name_for_subject(subjects::GUILD_BAN_REMOVE),
            "GUILD_BAN_REMOVE"
        );
    }

    #[test]
    fn decode_failure_carries_subject_and_reason() {
        let envelope = EventEnvelope {
            event_type: "MESSAGE_CREATE".to_string(),
            data: serde_json::json!({"not": "a message"}),
        };
        let result: Result<MessageCreateData, _> = envelope.decode(subjects::MESSAGE_CREATE);
        assert!(result.is_err());
    }

    #[test]
    fn round_trips_through_json_value() {
        let data = MessageCreateData {
            id: "m1".into(),
            channel_id: "c1".into(),
            guild_id: "g1".into(),
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
        let envelope = EventEnvelope::new("MESSAGE_CREATE", &data).unwrap();
        let decoded: MessageCreateData = envelope.decode(subjects::MESSAGE_CREATE).unwrap();
        assert_eq!(decoded.id, "m1");
        assert_eq!(decoded.content, "hi");
    }
}
