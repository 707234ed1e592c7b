//! Sliding-window spam tracker. The public surface is exactly `check`
//! and `cleanup`; no internal map is ever exposed. An `RwLock<HashMap<..>>`
//! guards the shared mutable state behind that small method surface.

use crate::{ChannelId, UserId};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct Entry {
    content: String,
    timestamp: Instant,
}

#[derive(Default)]
struct Window {
    entries: Vec<Entry>,
}

/// Tracks recent messages per `(user_id, channel_id)` and reports
/// whether either the message-rate or duplicate-content thresholds are
/// exceeded within a trailing window (spec.md §4.2 spam_filter).
#[derive(Default)]
pub struct SpamTracker {
    windows: RwLock<HashMap<(UserId, ChannelId), Window>>,
}

impl SpamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `(content, now)` to the `(user, channel)` window, evict
    /// entries older than `window_seconds`, then report whether the
    /// window count exceeds `max_messages` or the new content's
    /// duplicate count exceeds `max_duplicates` (spec.md §4.2 "Spam
    /// filter algorithm").
    pub fn check(
        &self,
        user_id: &UserId,
        channel_id: &ChannelId,
        content: &str,
        max_messages: usize,
        max_duplicates: usize,
        window_seconds: u64,
        now: Instant,
    ) -> (bool, String) {
        let window = Duration::from_secs(window_seconds);
        let key = (user_id.clone(), channel_id.clone());
        let mut windows = self.windows.write().unwrap();
        let entry = windows.entry(key).or_default();

        entry.entries.retain(|e| now.duration_since(e.timestamp) <= window);
        entry.entries.push(Entry { content: content.to_string(), timestamp: now });

        let count = entry.entries.len();
        if count > max_messages {
            return (true, format!("{count} messages exceeds limit of {max_messages}"));
        }

        let duplicates = entry.entries.iter().filter(|e| e.content == content).count();
        if duplicates > max_duplicates {
            return (true, format!("{duplicates} duplicate messages exceeds limit of {max_duplicates}"));
        }

        (false, String::new())
    }

    /// Drop all entries older than `max_age`, and drop any `(user,
    /// channel)` window left with no entries. Run periodically by the
    /// Worker Manager's spam-cleanup cadence (spec.md §4.2 `CleanupSpam`).
    pub fn cleanup(&self, max_age: Duration, now: Instant) {
        let mut windows = self.windows.write().unwrap();
        windows.retain(|_key, window| {
            window.entries.retain(|e| now.duration_since(e.timestamp) <= max_age);
            !window.entries.is_empty()
        });
    }

    /// Number of tracked `(user, channel)` windows, for tests and
    /// operational introspection.
    pub fn tracked_keys(&self) -> usize {
        self.windows.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_on_message_count() {
        let tracker = SpamTracker::new();
        let user = "u1".to_string();
        let channel = "c1".to_string();
        let now = Instant::now();

        for i in 0..5 {
            let (triggered, _) = tracker.check(&user, &channel, &format!("msg {i}"), 4, 100, 60, now);
            if i < 4 {
                assert!(!triggered, "should not trigger at message {i}");
            } else {
                assert!(triggered, "should trigger on the 5th message");
            }
        }
    }

    #[test]
    fn triggers_on_duplicate_content() {
        let tracker = SpamTracker::new();
        let user = "u1".to_string();
        let channel = "c1".to_string();
        let now = Instant::now();

        tracker.check(&user, &channel, "spam", 100, 2, 60, now);
        tracker.check(&user, &channel, "spam", 100, 2, 60, now);
        let (triggered, reason) = tracker.check(&user, &channel, "spam", 100, 2, 60, now);
        assert!(triggered);
        assert!(reason.contains("duplicate"));
    }

    #[test]
    fn old_entries_age_out_of_the_window() {
        let tracker = SpamTracker::new();
        let user = "u1".to_string();
        let channel = "c1".to_string();
        let start = Instant::now();

        for i in 0..5 {
            tracker.check(&user, &channel, &format!("msg {i}"), 4, 100, 5, start);
        }
        let (triggered, _) = tracker.check(&user, &channel, "fresh", 4, 100, 5, start + Duration::from_secs(10));
        assert!(!triggered);
    }

    #[test]
    fn cleanup_drops_stale_windows() {
        let tracker = SpamTracker::new();
        let start = Instant::now();
        tracker.check(&"u1".to_string(), &"c1".to_string(), "hi", 100, 100, 60, start);
        assert_eq!(tracker.tracked_keys(), 1);

        tracker.cleanup(Duration::from_secs(60), start + Duration::from_secs(120));
        assert_eq!(tracker.tracked_keys(), 0);
    }
}
