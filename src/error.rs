//! Top-level error types for the AmityVox core subsystem.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Automod(#[from] AutomodError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors (spec.md §7 `ConfigError`): a missing
/// required dependency at startup. The affected worker is skipped by the
/// caller; this variant itself just carries why.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence port failures (spec.md §7 `PersistenceError`): transient
/// DB failure. Logged with contextual identifiers by the caller; never
/// retried within the originating tick.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("query failed: {0}")]
    Query(String),
}

/// MessageBroker adapter failures.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// spec.md §7 `PublishError` — broker rejected the message.
    #[error("publish to {subject} rejected: {reason}")]
    Publish { subject: String, reason: String },

    /// spec.md §7 `DecodeError` — malformed event payload. The
    /// subscription continues; one bad message must not poison the
    /// stream.
    #[error("failed to decode payload for {subject} as {expected}: {reason}")]
    Decode {
        subject: String,
        expected: &'static str,
        reason: String,
    },
}

/// Automod engine failures.
#[derive(Debug, thiserror::Error)]
pub enum AutomodError {
    #[error("rule {rule_id} has invalid config: {reason}")]
    InvalidRuleConfig { rule_id: String, reason: String },

    #[error("failed to write action record: {0}")]
    AuditWriteFailed(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Notification service failures.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("failed to create notification for {user_id}: {reason}")]
    CreateFailed { user_id: String, reason: String },

    #[error("push delivery to {user_id} failed: {reason}")]
    DeliveryFailed { user_id: String, reason: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
