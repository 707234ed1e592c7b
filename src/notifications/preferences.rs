//! `PreferencesPort`: the per-user preference gate consulted before a
//! notification is created (spec.md §3 `NotificationPreference`, "Opaque
//! to the core").

use crate::{ChannelId, GuildId, UserId};
use std::future::Future;
use std::pin::Pin;

pub trait PreferencesPort: Send + Sync + 'static {
    /// `ShouldNotify(user_id, guild_id, channel_id, isMention, isDM,
    /// isHere) → bool` (spec.md §4.5).
    fn should_notify(
        &self,
        user_id: &UserId,
        guild_id: Option<&GuildId>,
        channel_id: Option<&ChannelId>,
        is_mention: bool,
        is_dm: bool,
        is_here: bool,
    ) -> impl Future<Output = bool> + Send;
}

pub trait PreferencesPortDyn: Send + Sync + 'static {
    fn should_notify<'a>(
        &'a self,
        user_id: &'a UserId,
        guild_id: Option<&'a GuildId>,
        channel_id: Option<&'a ChannelId>,
        is_mention: bool,
        is_dm: bool,
        is_here: bool,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

impl<T: PreferencesPort> PreferencesPortDyn for T {
    fn should_notify<'a>(
        &'a self,
        user_id: &'a UserId,
        guild_id: Option<&'a GuildId>,
        channel_id: Option<&'a ChannelId>,
        is_mention: bool,
        is_dm: bool,
        is_here: bool,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(PreferencesPort::should_notify(self, user_id, guild_id, channel_id, is_mention, is_dm, is_here))
    }
}

/// Default adapter when no preference store is wired: every recipient is
/// notified. A real deployment supplies its own `PreferencesPort` backed
/// by user settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllPreferences;

impl PreferencesPort for AllowAllPreferences {
    async fn should_notify(
        &self,
        _user_id: &UserId,
        _guild_id: Option<&GuildId>,
        _channel_id: Option<&ChannelId>,
        _is_mention: bool,
        _is_dm: bool,
        _is_here: bool,
    ) -> bool {
        true
    }
}
