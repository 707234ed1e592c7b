//! Configuration loading and validation.

use crate::error::{ConfigError, Result};

/// AmityVox core subsystem configuration: cadences and thresholds that
/// spec.md leaves as implementation-defined numbers, loaded from the
/// environment so they aren't magic numbers scattered through worker
/// bodies.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub session_cleanup_interval_secs: u64,
    pub invite_cleanup_interval_secs: u64,
    pub search_sync_interval_secs: u64,
    pub event_reminder_interval_secs: u64,
    pub bookmark_reminder_interval_secs: u64,
    pub push_sub_cleanup_interval_secs: u64,
    pub mls_key_cleanup_interval_secs: u64,
    pub ban_cleanup_interval_secs: u64,
    pub push_sub_max_age_days: i64,
    pub default_timeout_secs: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            session_cleanup_interval_secs: 3600,
            invite_cleanup_interval_secs: 21_600,
            search_sync_interval_secs: 300,
            event_reminder_interval_secs: 300,
            bookmark_reminder_interval_secs: 60,
            push_sub_cleanup_interval_secs: 86_400,
            mls_key_cleanup_interval_secs: 21_600,
            ban_cleanup_interval_secs: 3600,
            push_sub_max_age_days: 90,
            default_timeout_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from the environment, validating any override
    /// eagerly rather than falling back silently on a malformed value.
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(value) = env_u64("AMITYVOX_SESSION_CLEANUP_INTERVAL_SECS")? {
            config.session_cleanup_interval_secs = value;
        }
        if let Some(value) = env_u64("AMITYVOX_INVITE_CLEANUP_INTERVAL_SECS")? {
            config.invite_cleanup_interval_secs = value;
        }
        if let Some(value) = env_u64("AMITYVOX_SEARCH_SYNC_INTERVAL_SECS")? {
            config.search_sync_interval_secs = value;
        }
        if let Some(value) = env_u64("AMITYVOX_EVENT_REMINDER_INTERVAL_SECS")? {
            config.event_reminder_interval_secs = value;
        }
        if let Some(value) = env_u64("AMITYVOX_BOOKMARK_REMINDER_INTERVAL_SECS")? {
            config.bookmark_reminder_interval_secs = value;
        }
        if let Some(value) = env_u64("AMITYVOX_PUSH_SUB_CLEANUP_INTERVAL_SECS")? {
            config.push_sub_cleanup_interval_secs = value;
        }
        if let Some(value) = env_u64("AMITYVOX_MLS_KEY_CLEANUP_INTERVAL_SECS")? {
            config.mls_key_cleanup_interval_secs = value;
        }
        if let Some(value) = env_u64("AMITYVOX_BAN_CLEANUP_INTERVAL_SECS")? {
            config.ban_cleanup_interval_secs = value;
        }
        if let Some(value) = env_i64("AMITYVOX_PUSH_SUB_MAX_AGE_DAYS")? {
            config.push_sub_max_age_days = value;
        }
        if let Some(value) = env_i64("AMITYVOX_DEFAULT_TIMEOUT_SECS")? {
            config.default_timeout_secs = value;
        }
        if let Ok(url) = std::env::var("AMITYVOX_DATABASE_URL") {
            config.database_url = url;
        }

        Ok(config)
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<u64>().map(Some).map_err(|error| {
            ConfigError::Invalid {
                key: key.to_string(),
                reason: error.to_string(),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}

fn env_i64(key: &str) -> Result<Option<i64>> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<i64>().map(Some).map_err(|error| {
            ConfigError::Invalid {
                key: key.to_string(),
                reason: error.to_string(),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_cadences() {
        let config = Config::default();
        assert_eq!(config.session_cleanup_interval_secs, 3600);
        assert_eq!(config.bookmark_reminder_interval_secs, 60);
        assert_eq!(config.event_reminder_interval_secs, 300);
    }

    #[test]
    fn rejects_unparsable_override() {
        // SAFETY: test-only, single-threaded access to this env var.
        unsafe { std::env::set_var("AMITYVOX_SESSION_CLEANUP_INTERVAL_SECS", "not-a-number") };
        let result = Config::load();
        unsafe { std::env::remove_var("AMITYVOX_SESSION_CLEANUP_INTERVAL_SECS") };
        assert!(result.is_err());
    }
}
