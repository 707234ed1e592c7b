//! AmityVox core: the event bus and background worker manager, the
//! automod evaluation engine, and the notification derivation pipeline.
//!
//! Everything else in AmityVox — HTTP routing, the web client, schema
//! migrations, federation, voice — is an external collaborator. This
//! crate only defines the contracts those collaborators plug into and
//! implements the hard concurrency-and-correctness core that sits behind
//! them.

pub mod automod;
pub mod broker;
pub mod config;
pub mod derivation;
pub mod error;
pub mod events;
pub mod jobs;
pub mod media;
pub mod notifications;
pub mod persistence;
pub mod search;
pub mod spam;
pub mod worker_manager;

pub use error::{Error, Result};

/// Guild identifier.
pub type GuildId = String;
/// Channel identifier (DM or guild channel).
pub type ChannelId = String;
/// User identifier.
pub type UserId = String;
/// Message identifier.
pub type MessageId = String;
/// Automod rule identifier.
pub type RuleId = String;
/// Role identifier.
pub type RoleId = String;
/// Guild event identifier (scheduled events, for reminders).
pub type GuildEventId = String;
