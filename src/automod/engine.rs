//! The Automod Engine (spec.md §4.2): rule loading, per-guild content
//! evaluation, action execution, audit logging, event publication.

use super::rules::{check_rule, DetectorInput, RuleConfig};
use crate::broker::{publish_event, BrokerDyn};
use crate::error::{AutomodError, Result};
use crate::events::{subjects, AutomodActionData, MessageDeleteData};
use crate::persistence::{AutomodRule, NewActionRecord, PersistenceDyn};
use crate::spam::SpamTracker;
use crate::{ChannelId, GuildId, MessageId, RoleId, UserId};
use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Immutable message context built by the write path (spec.md §3
/// `MessageContext`).
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: GuildId,
    pub author_id: UserId,
    pub content: String,
    pub member_role_ids: Vec<RoleId>,
    pub mention_count: usize,
}

/// Dispatches a loaded rule, carrying the match reason (spec.md §4.2
/// `Evaluate`).
pub struct Trigger {
    pub rule: AutomodRule,
    pub reason: String,
}

/// Evaluates, audits, and acts on messages against a guild's rule set.
pub struct AutomodEngine {
    persistence: Arc<dyn PersistenceDyn>,
    broker: Arc<dyn BrokerDyn>,
    spam_tracker: Arc<SpamTracker>,
    default_timeout_secs: i64,
}

impl AutomodEngine {
    pub fn new(
        persistence: Arc<dyn PersistenceDyn>,
        broker: Arc<dyn BrokerDyn>,
        spam_tracker: Arc<SpamTracker>,
        default_timeout_secs: i64,
    ) -> Self {
        Self { persistence, broker, spam_tracker, default_timeout_secs }
    }

    /// Returns enabled rules for `guild_id` ordered by `created_at`
    /// ascending (spec.md §4.2 `LoadGuildRules`).
    pub async fn load_guild_rules(&self, guild_id: &GuildId) -> Result<Vec<AutomodRule>> {
        self.persistence.load_guild_rules(guild_id).await
    }

    /// Returns the first triggering rule or `None`. DMs (empty
    /// `guild_id`) short-circuit to `None` (spec.md §4.2 `Evaluate`).
    pub async fn evaluate(&self, ctx: &MessageContext) -> Result<Option<Trigger>> {
        if ctx.guild_id.is_empty() {
            return Ok(None);
        }

        let rules = self.load_guild_rules(&ctx.guild_id).await?;
        for rule in rules {
            if self.is_exempt(&rule, ctx) {
                continue;
            }
            let outcome = self.check_rule(&rule, ctx)?;
            if outcome.triggered {
                return Ok(Some(Trigger { rule, reason: outcome.reason }));
            }
        }
        Ok(None)
    }

    fn is_exempt(&self, rule: &AutomodRule, ctx: &MessageContext) -> bool {
        if rule.exempt_channel_ids.iter().any(|id| id == &ctx.channel_id) {
            return true;
        }
        rule.exempt_role_ids.iter().any(|role| ctx.member_role_ids.contains(role))
    }

    /// Pure dispatch over the seven detector kinds; side effects land
    /// only in the spam tracker for `spam_filter` (spec.md §4.2
    /// `CheckRule`).
    pub fn check_rule(&self, rule: &AutomodRule, ctx: &MessageContext) -> Result<super::rules::DetectorOutcome> {
        let config = RuleConfig::from_stored(&rule.rule_type, &rule.config).map_err(|error| AutomodError::InvalidRuleConfig {
            rule_id: rule.id.clone(),
            reason: error.to_string(),
        })?;
        let input = DetectorInput {
            content: &ctx.content,
            user_id: &ctx.author_id,
            channel_id: &ctx.channel_id,
            mention_count: ctx.mention_count,
            guild_id: &rule.guild_id,
        };
        Ok(check_rule(&config, &input, &self.spam_tracker))
    }

    /// Idempotent per `(rule, message)`: writes the audit row, then
    /// performs the action (spec.md §4.2 `ExecuteAction`). The audit row
    /// is always written before the action switch, even if the action
    /// itself later fails, to preserve evidence.
    pub async fn execute_action(&self, rule: &AutomodRule, ctx: &MessageContext, reason: &str) -> Result<()> {
        self.persistence
            .insert_action_record(NewActionRecord {
                guild_id: ctx.guild_id.clone(),
                rule_id: rule.id.clone(),
                channel_id: ctx.channel_id.clone(),
                message_id: ctx.message_id.clone(),
                user_id: ctx.author_id.clone(),
                action: rule.action.clone(),
                reason: reason.to_string(),
            })
            .await
            .map_err(|error| AutomodError::AuditWriteFailed(error.to_string()))?;

        match rule.action.as_str() {
            "delete" => self.delete_and_publish(ctx).await,
            "timeout" => {
                let duration = rule
                    .timeout_duration_seconds
                    .filter(|seconds| *seconds > 0)
                    .unwrap_or(self.default_timeout_secs);
                let until = Utc::now() + chrono::Duration::seconds(duration);
                self.persistence.set_member_timeout(&ctx.guild_id, &ctx.author_id, until).await?;
                self.delete_and_publish(ctx).await
            }
            "warn" | "log" => self.publish_automod_action(rule, ctx, reason).await,
            other => {
                tracing::warn!(action = other, rule_id = %rule.id, "unknown automod action, treating as log-only");
                self.publish_automod_action(rule, ctx, reason).await
            }
        }
    }

    async fn delete_and_publish(&self, ctx: &MessageContext) -> Result<()> {
        self.persistence.delete_message(&ctx.message_id).await?;
        let data = MessageDeleteData {
            id: ctx.message_id.clone(),
            channel_id: ctx.channel_id.clone(),
            guild_id: ctx.guild_id.clone(),
        };
        if let Err(error) = publish_event(self.broker.as_ref(), subjects::MESSAGE_DELETE, "MESSAGE_DELETE", data).await {
            tracing::warn!(%error, "failed to publish MESSAGE_DELETE after automod action");
        }
        Ok(())
    }

    async fn publish_automod_action(&self, rule: &AutomodRule, ctx: &MessageContext, reason: &str) -> Result<()> {
        let data = AutomodActionData {
            guild_id: ctx.guild_id.clone(),
            rule_id: rule.id.clone(),
            channel_id: ctx.channel_id.clone(),
            message_id: ctx.message_id.clone(),
            user_id: ctx.author_id.clone(),
            action: rule.action.clone(),
            reason: reason.to_string(),
        };
        if let Err(error) = publish_event(self.broker.as_ref(), subjects::AUTOMOD_ACTION, "AUTOMOD_ACTION", data).await {
            tracing::warn!(%error, "failed to publish AUTOMOD_ACTION");
        }
        Ok(())
    }

    /// Evicts spam-tracker entries idle beyond `max_age` (spec.md §4.2
    /// `CleanupSpam`), called on a periodic cadence by the Worker
    /// Manager.
    pub fn cleanup_spam(&self, max_age: Duration) {
        self.spam_tracker.cleanup(max_age, Instant::now());
    }
}

/// Dependency seam the Worker Manager dispatches message-create events
/// through (spec.md §6 config object's `automod?: AutomodPort`).
pub trait AutomodPort: Send + Sync + 'static {
    fn handle_message_create(&self, ctx: MessageContext) -> impl Future<Output = Result<()>> + Send;
}

pub trait AutomodPortDyn: Send + Sync + 'static {
    fn handle_message_create<'a>(&'a self, ctx: MessageContext) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

impl<T: AutomodPort> AutomodPortDyn for T {
    fn handle_message_create<'a>(&'a self, ctx: MessageContext) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(AutomodPort::handle_message_create(self, ctx))
    }
}

impl AutomodPort for AutomodEngine {
    async fn handle_message_create(&self, ctx: MessageContext) -> Result<()> {
        if let Some(trigger) = self.evaluate(&ctx).await? {
            self.execute_action(&trigger.rule, &ctx, &trigger.reason).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::persistence::SqlitePersistence;
    use sqlx::SqlitePool;

    async fn test_engine() -> (AutomodEngine, SqlitePool) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(crate::persistence::DDL).execute(&pool).await.unwrap();
        let persistence: Arc<dyn PersistenceDyn> = Arc::new(SqlitePersistence::new(pool.clone()));
        let broker: Arc<dyn BrokerDyn> = Arc::new(InMemoryBroker::new());
        let engine = AutomodEngine::new(persistence, broker, Arc::new(SpamTracker::new()), 60);
        (engine, pool)
    }

    async fn insert_rule(pool: &SqlitePool, rule_type: &str, config: serde_json::Value, action: &str) {
        sqlx::query(
            r#"
            INSERT INTO automod_rules
                (id, guild_id, name, enabled, rule_type, config, action, timeout_duration_seconds,
                 exempt_channel_ids, exempt_role_ids, created_by, created_at, updated_at)
            VALUES ('r1', 'g1', 'rule', 1, ?, ?, ?, NULL, '[]', '[]', 'u0', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')
            "#,
        )
        .bind(rule_type)
        .bind(config.to_string())
        .bind(action)
        .execute(pool)
        .await
        .unwrap();
    }

    fn ctx(content: &str) -> MessageContext {
        MessageContext {
            message_id: "m1".into(),
            channel_id: "c1".into(),
            guild_id: "g1".into(),
            author_id: "u1".into(),
            content: content.to_string(),
            member_role_ids: vec![],
            mention_count: 0,
        }
    }

    #[tokio::test]
    async fn word_filter_deletes_message() {
        let (engine, pool) = test_engine().await;
        sqlx::query("INSERT INTO messages (id, channel_id, author_id, content) VALUES ('m1', 'c1', 'u1', 'hey badword')")
            .execute(&pool)
            .await
            .unwrap();
        insert_rule(&pool, "word_filter", serde_json::json!({"words": ["badword"], "match_whole_word": true}), "delete").await;

        let trigger = engine.evaluate(&ctx("hey badword")).await.unwrap().expect("should trigger");
        engine.execute_action(&trigger.rule, &ctx("hey badword"), &trigger.reason).await.unwrap();

        let remaining = sqlx::query("SELECT id FROM messages WHERE id = 'm1'").fetch_optional(&pool).await.unwrap();
        assert!(remaining.is_none());
    }

    #[tokio::test]
    async fn dm_short_circuits_to_no_rule() {
        let (engine, _pool) = test_engine().await;
        let mut dm_ctx = ctx("anything");
        dm_ctx.guild_id = String::new();
        assert!(engine.evaluate(&dm_ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exempt_role_skips_triggering_rule() {
        let (engine, pool) = test_engine().await;
        sqlx::query(
            r#"
            INSERT INTO automod_rules
                (id, guild_id, name, enabled, rule_type, config, action, timeout_duration_seconds,
                 exempt_channel_ids, exempt_role_ids, created_by, created_at, updated_at)
            VALUES ('r1', 'g1', 'rule', 1, 'word_filter', '{"words":["badword"],"match_whole_word":false}', 'delete', NULL,
                    '[]', '["mod"]', 'u0', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut exempt_ctx = ctx("hey badword");
        exempt_ctx.member_role_ids = vec!["mod".to_string()];
        assert!(engine.evaluate(&exempt_ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn timeout_action_sets_member_timeout_and_deletes() {
        let (engine, pool) = test_engine().await;
        sqlx::query("INSERT INTO messages (id, channel_id, author_id, content) VALUES ('m1', 'c1', 'u1', 'spam spam spam spam')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO guild_members (guild_id, user_id) VALUES ('g1', 'u1')").execute(&pool).await.unwrap();
        insert_rule(&pool, "mention_spam", serde_json::json!({"max_mentions": 1}), "timeout").await;

        let mut mention_ctx = ctx("spam spam spam spam");
        mention_ctx.mention_count = 5;
        let trigger = engine.evaluate(&mention_ctx).await.unwrap().expect("should trigger");
        engine.execute_action(&trigger.rule, &mention_ctx, &trigger.reason).await.unwrap();

        let timeout_until: Option<String> =
            sqlx::query_scalar("SELECT timeout_until FROM guild_members WHERE guild_id = 'g1' AND user_id = 'u1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(timeout_until.is_some());

        let ban_row = sqlx::query("SELECT expires_at FROM guild_bans WHERE guild_id = 'g1' AND user_id = 'u1'")
            .fetch_optional(&pool)
            .await
            .unwrap();
        assert!(ban_row.is_none(), "timeout must not write a guild_bans row, or ban-cleanup would emit a spurious GUILD_BAN_REMOVE for it");
    }
}
