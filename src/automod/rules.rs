//! Tagged `RuleConfig` variants and the seven detector kinds (spec.md
//! §4.2, §9 REDESIGN FLAGS item 2: never let untyped config maps leak
//! into evaluation code).

use crate::spam::SpamTracker;
use crate::{ChannelId, GuildId, UserId};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One variant per `rule_type` (spec.md §3 `AutomodRule.rule_type`).
/// Deserialized from the stored JSON blob at rule-load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum RuleConfig {
    WordFilter {
        words: Vec<String>,
        #[serde(default)]
        match_whole_word: bool,
    },
    RegexFilter {
        patterns: Vec<String>,
    },
    InviteFilter {
        #[serde(default = "default_invite_domains")]
        invite_domains: Vec<String>,
        #[serde(default)]
        allow_own_guild: bool,
    },
    MentionSpam {
        max_mentions: usize,
    },
    CapsFilter {
        min_length: usize,
        max_caps_percent: f64,
    },
    SpamFilter {
        max_messages: usize,
        max_duplicates: usize,
        window_seconds: u64,
    },
    LinkFilter {
        #[serde(default)]
        allowed_domains: Vec<String>,
        #[serde(default)]
        blocked_domains: Vec<String>,
    },
}

fn default_invite_domains() -> Vec<String> {
    vec!["amityvox.gg/invite/".to_string(), "invite.amityvox.gg/".to_string()]
}

impl RuleConfig {
    /// Parse the stored JSON blob, keyed by `rule_type`, into its typed
    /// variant. Never exposed as an untyped map to callers.
    pub fn from_stored(rule_type: &str, config: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut tagged = config.clone();
        if let serde_json::Value::Object(ref mut map) = tagged {
            map.insert("rule_type".to_string(), serde_json::Value::String(rule_type.to_string()));
        }
        serde_json::from_value(tagged)
    }
}

/// The message content and context a detector evaluates against
/// (spec.md §3 `MessageContext`).
pub struct DetectorInput<'a> {
    pub content: &'a str,
    pub user_id: &'a UserId,
    pub channel_id: &'a ChannelId,
    pub mention_count: usize,
    /// The evaluating rule's own guild, so `invite_filter` can tell an
    /// own-guild invite from a foreign-guild one.
    pub guild_id: &'a GuildId,
}

/// Outcome of `check_rule` (spec.md §4.2 `CheckRule`).
pub struct DetectorOutcome {
    pub triggered: bool,
    pub reason: String,
}

fn no_trigger() -> DetectorOutcome {
    DetectorOutcome { triggered: false, reason: String::new() }
}

/// Pure dispatch over the seven detector kinds (spec.md §4.2). The
/// `spam_filter` kind is the only one with side effects — it records the
/// message in `spam_tracker` regardless of whether it triggers.
pub fn check_rule(config: &RuleConfig, input: &DetectorInput<'_>, spam_tracker: &SpamTracker) -> DetectorOutcome {
    match config {
        RuleConfig::WordFilter { words, match_whole_word } => check_word_filter(words, *match_whole_word, input),
        RuleConfig::RegexFilter { patterns } => check_regex_filter(patterns, input),
        RuleConfig::InviteFilter { invite_domains, allow_own_guild } => {
            check_invite_filter(invite_domains, *allow_own_guild, input)
        }
        RuleConfig::MentionSpam { max_mentions } => check_mention_spam(*max_mentions, input),
        RuleConfig::CapsFilter { min_length, max_caps_percent } => {
            check_caps_filter(*min_length, *max_caps_percent, input)
        }
        RuleConfig::SpamFilter { max_messages, max_duplicates, window_seconds } => {
            check_spam_filter(*max_messages, *max_duplicates, *window_seconds, input, spam_tracker)
        }
        RuleConfig::LinkFilter { allowed_domains, blocked_domains } => {
            check_link_filter(allowed_domains, blocked_domains, input)
        }
    }
}

fn check_word_filter(words: &[String], match_whole_word: bool, input: &DetectorInput<'_>) -> DetectorOutcome {
    let lower = input.content.to_lowercase();
    let tokens: Vec<&str> = lower.split_whitespace().collect();

    for word in words {
        let needle = word.to_lowercase();
        let hit = if match_whole_word { tokens.contains(&needle.as_str()) } else { lower.contains(&needle) };
        if hit {
            return DetectorOutcome { triggered: true, reason: format!("matched word \"{word}\"") };
        }
    }
    no_trigger()
}

fn check_regex_filter(patterns: &[String], input: &DetectorInput<'_>) -> DetectorOutcome {
    for pattern in patterns {
        let Ok(regex) = regex::Regex::new(pattern) else {
            // Invalid patterns are skipped, not errors (spec.md §4.2).
            continue;
        };
        if regex.is_match(input.content) {
            return DetectorOutcome { triggered: true, reason: format!("matched pattern \"{pattern}\"") };
        }
    }
    no_trigger()
}

/// An invite URL's target guild is the path segment right after the
/// matched domain prefix, e.g. `amityvox.gg/invite/<guild_id>`.
fn invite_target_guild(content: &str, domain_start: usize, domain_len: usize) -> &str {
    let after = &content[domain_start + domain_len..];
    after.split(|c: char| c.is_whitespace() || c == '/').next().unwrap_or("")
}

fn check_invite_filter(invite_domains: &[String], allow_own_guild: bool, input: &DetectorInput<'_>) -> DetectorOutcome {
    let lower = input.content.to_lowercase();
    for domain in invite_domains {
        let domain_lower = domain.to_lowercase();
        if let Some(pos) = lower.find(&domain_lower) {
            let target_guild = invite_target_guild(input.content, pos, domain.len());
            if allow_own_guild && target_guild == input.guild_id {
                continue;
            }
            return DetectorOutcome { triggered: true, reason: format!("contains invite link ({domain})") };
        }
    }
    no_trigger()
}

fn check_mention_spam(max_mentions: usize, input: &DetectorInput<'_>) -> DetectorOutcome {
    if input.mention_count > max_mentions {
        DetectorOutcome {
            triggered: true,
            reason: format!("{} mentions exceeds limit of {}", input.mention_count, max_mentions),
        }
    } else {
        no_trigger()
    }
}

fn check_caps_filter(min_length: usize, max_caps_percent: f64, input: &DetectorInput<'_>) -> DetectorOutcome {
    let letters: Vec<char> = input.content.chars().filter(|c| c.is_alphabetic()).collect();
    if input.content.len() < min_length || letters.is_empty() {
        return no_trigger();
    }
    let upper_count = letters.iter().filter(|c| c.is_uppercase()).count();
    let percent = (upper_count as f64 / letters.len() as f64) * 100.0;
    if percent >= max_caps_percent {
        DetectorOutcome { triggered: true, reason: format!("{percent:.0}% caps exceeds limit of {max_caps_percent:.0}%") }
    } else {
        no_trigger()
    }
}

fn check_spam_filter(
    max_messages: usize,
    max_duplicates: usize,
    window_seconds: u64,
    input: &DetectorInput<'_>,
    spam_tracker: &SpamTracker,
) -> DetectorOutcome {
    let (triggered, reason) = spam_tracker.check(
        input.user_id,
        input.channel_id,
        input.content,
        max_messages,
        max_duplicates,
        window_seconds,
        Instant::now(),
    );
    DetectorOutcome { triggered, reason }
}

fn check_link_filter(allowed_domains: &[String], blocked_domains: &[String], input: &DetectorInput<'_>) -> DetectorOutcome {
    let url_pattern = regex::Regex::new(r"https?://([^\s/]+)").unwrap();
    for capture in url_pattern.captures_iter(input.content) {
        let host = capture[1].to_lowercase();
        let blocked = blocked_domains.iter().any(|domain| host == domain.to_lowercase() || host.ends_with(&format!(".{}", domain.to_lowercase())));
        let allowed = allowed_domains.is_empty()
            || allowed_domains.iter().any(|domain| host == domain.to_lowercase() || host.ends_with(&format!(".{}", domain.to_lowercase())));
        if blocked || !allowed {
            return DetectorOutcome { triggered: true, reason: format!("link to disallowed host \"{host}\"") };
        }
    }
    no_trigger()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(content: &'a str, user_id: &'a UserId, channel_id: &'a ChannelId, guild_id: &'a GuildId) -> DetectorInput<'a> {
        DetectorInput { content, user_id, channel_id, mention_count: 0, guild_id }
    }

    #[test]
    fn word_filter_matches_case_insensitively() {
        let config = RuleConfig::WordFilter { words: vec!["badword".into()], match_whole_word: true };
        let user = "u1".to_string();
        let channel = "c1".to_string();
        let guild = "g1".to_string();
        let tracker = SpamTracker::new();
        let outcome = check_rule(&config, &input("hey BadWord", &user, &channel, &guild), &tracker);
        assert!(outcome.triggered);
    }

    #[test]
    fn word_filter_whole_word_does_not_match_substring() {
        let config = RuleConfig::WordFilter { words: vec!["ass".into()], match_whole_word: true };
        let user = "u1".to_string();
        let channel = "c1".to_string();
        let guild = "g1".to_string();
        let tracker = SpamTracker::new();
        let outcome = check_rule(&config, &input("assassinate", &user, &channel, &guild), &tracker);
        assert!(!outcome.triggered);
    }

    #[test]
    fn caps_filter_requires_min_length_and_percent() {
        let config = RuleConfig::CapsFilter { min_length: 5, max_caps_percent: 70.0 };
        let user = "u1".to_string();
        let channel = "c1".to_string();
        let guild = "g1".to_string();
        let tracker = SpamTracker::new();
        assert!(check_rule(&config, &input("HELLO!", &user, &channel, &guild), &tracker).triggered);
        assert!(!check_rule(&config, &input("hi", &user, &channel, &guild), &tracker).triggered);
    }

    #[test]
    fn mention_spam_counts_against_limit() {
        let config = RuleConfig::MentionSpam { max_mentions: 3 };
        let user = "u1".to_string();
        let channel = "c1".to_string();
        let guild = "g1".to_string();
        let tracker = SpamTracker::new();
        let mut over = input("ping", &user, &channel, &guild);
        over.mention_count = 4;
        assert!(check_rule(&config, &over, &tracker).triggered);
    }

    #[test]
    fn link_filter_blocks_disallowed_host() {
        let config = RuleConfig::LinkFilter { allowed_domains: vec!["amityvox.gg".into()], blocked_domains: vec![] };
        let user = "u1".to_string();
        let channel = "c1".to_string();
        let guild = "g1".to_string();
        let tracker = SpamTracker::new();
        let outcome = check_rule(&config, &input("check http://evil.example", &user, &channel, &guild), &tracker);
        assert!(outcome.triggered);
    }

    #[test]
    fn invite_filter_allows_own_guild_when_configured() {
        let config = RuleConfig::InviteFilter { invite_domains: vec!["amityvox.gg/invite/".into()], allow_own_guild: true };
        let user = "u1".to_string();
        let channel = "c1".to_string();
        let guild = "g1".to_string();
        let tracker = SpamTracker::new();
        let outcome = check_rule(&config, &input("join at amityvox.gg/invite/g1", &user, &channel, &guild), &tracker);
        assert!(!outcome.triggered);
    }

    #[test]
    fn invite_filter_still_triggers_on_foreign_guild_invite_even_when_allowed() {
        let config = RuleConfig::InviteFilter { invite_domains: vec!["amityvox.gg/invite/".into()], allow_own_guild: true };
        let user = "u1".to_string();
        let channel = "c1".to_string();
        let guild = "g1".to_string();
        let tracker = SpamTracker::new();
        let outcome = check_rule(&config, &input("join at amityvox.gg/invite/g2", &user, &channel, &guild), &tracker);
        assert!(outcome.triggered);
    }

    #[test]
    fn invite_filter_triggers_without_allow_own_guild_even_for_own_guild() {
        let config = RuleConfig::InviteFilter { invite_domains: vec!["amityvox.gg/invite/".into()], allow_own_guild: false };
        let user = "u1".to_string();
        let channel = "c1".to_string();
        let guild = "g1".to_string();
        let tracker = SpamTracker::new();
        let outcome = check_rule(&config, &input("join at amityvox.gg/invite/g1", &user, &channel, &guild), &tracker);
        assert!(outcome.triggered);
    }

    #[test]
    fn invalid_regex_is_skipped_not_an_error() {
        let config = RuleConfig::RegexFilter { patterns: vec!["(unclosed".into()] };
        let user = "u1".to_string();
        let channel = "c1".to_string();
        let guild = "g1".to_string();
        let tracker = SpamTracker::new();
        let outcome = check_rule(&config, &input("anything", &user, &channel, &guild), &tracker);
        assert!(!outcome.triggered);
    }
}
