//! In-process `Broker` implementation.
//!
//! No external broker process is available in this repository's scope,
//! but every ordering, fan-out, queue-group, and wildcard guarantee is
//! honored here, so swapping in a real NATS/JetStream client later is an
//! implementation substitution behind the same `Broker` trait. Keeps a
//! registry of live subscriber handles behind a lock, and isolates each
//! dispatch on its own `tokio::spawn` with errors logged rather than
//! propagated, so one bad handler never wedges the registry.

use crate::broker::traits::{Broker, Handler, SubscriptionHandle};
use crate::error::BrokerError;
use crate::events::EventEnvelope;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

struct Subscriber {
    id: uuid::Uuid,
    tx: mpsc::UnboundedSender<(String, EventEnvelope)>,
}

#[derive(Default)]
struct QueueGroup {
    members: Vec<Subscriber>,
    cursor: AtomicUsize,
}

#[derive(Default)]
struct Inner {
    exact: RwLock<HashMap<String, Vec<Subscriber>>>,
    wildcard: RwLock<Vec<(String, Subscriber)>>,
    queue_groups: RwLock<HashMap<(String, String), QueueGroup>>,
}

/// In-process message broker: subject-based pub/sub with queue groups
/// and trailing-`>` wildcards, backed by per-subscriber ordered delivery
/// tasks.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions across all registries, for tests and
    /// operational introspection.
    pub fn active_subscriptions(&self) -> usize {
        let exact: usize = self.inner.exact.read().unwrap().values().map(Vec::len).sum();
        let wildcard = self.inner.wildcard.read().unwrap().len();
        let queue: usize = self
            .inner
            .queue_groups
            .read()
            .unwrap()
            .values()
            .map(|group| group.members.len())
            .sum();
        exact + wildcard + queue
    }

    /// Spawn the dedicated per-subscriber delivery loop: messages are
    /// processed one at a time, in arrival order, so a single publisher's
    /// publications reach this subscriber in the order published
    /// (spec.md §5). Each handler invocation runs in its own task so a
    /// panic is caught via the `JoinHandle` rather than tearing down the
    /// loop (spec.md §4.1, §7 `HandlerPanic`).
    fn spawn_subscriber(handler: Handler) -> (uuid::Uuid, mpsc::UnboundedSender<(String, EventEnvelope)>) {
        let id = uuid::Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, EventEnvelope)>();

        tokio::spawn(async move {
            while let Some((subject, envelope)) = rx.recv().await {
                let event_type = envelope.event_type.clone();
                let handler = handler.clone();
                let dispatch_subject = subject.clone();
                let join = tokio::spawn(async move { handler(dispatch_subject, envelope).await });

                match join.await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        tracing::warn!(%subject, %event_type, %error, "subscription handler returned an error");
                    }
                    Err(join_error) if join_error.is_panic() => {
                        tracing::error!(%subject, %event_type, "subscription handler panicked, subscription stays live");
                    }
                    Err(join_error) => {
                        tracing::warn!(%subject, %event_type, %join_error, "subscription handler task did not complete");
                    }
                }
            }
        });

        (id, tx)
    }
}

impl Broker for InMemoryBroker {
    async fn publish(&self, subject: &str, envelope: EventEnvelope) -> std::result::Result<(), BrokerError> {
        if subject.is_empty() {
            return Err(BrokerError::Publish {
                subject: subject.to_string(),
                reason: "subject must not be empty".to_string(),
            });
        }

        if let Some(subscribers) = self.inner.exact.read().unwrap().get(subject) {
            for subscriber in subscribers {
                let _ = subscriber.tx.send((subject.to_string(), envelope.clone()));
            }
        }

        for (pattern, subscriber) in self.inner.wildcard.read().unwrap().iter() {
            if match_subject(pattern, subject) {
                let _ = subscriber.tx.send((subject.to_string(), envelope.clone()));
            }
        }

        {
            let groups = self.inner.queue_groups.read().unwrap();
            for ((group_subject, _group_name), group) in groups.iter() {
                if group_subject != subject || group.members.is_empty() {
                    continue;
                }
                let next = group.cursor.fetch_add(1, Ordering::Relaxed) % group.members.len();
                let _ = group.members[next].tx.send((subject.to_string(), envelope.clone()));
            }
        }

        Ok(())
    }

    fn subscribe(&self, subject: &str, handler: Handler) -> SubscriptionHandle {
        let (id, tx) = Self::spawn_subscriber(handler);
        self.inner
            .exact
            .write()
            .unwrap()
            .entry(subject.to_string())
            .or_default()
            .push(Subscriber { id, tx });

        let inner = self.inner.clone();
        let subject = subject.to_string();
        SubscriptionHandle {
            id,
            on_drop: Some(Box::new(move |id| {
                if let Some(subscribers) = inner.exact.write().unwrap().get_mut(&subject) {
                    subscribers.retain(|subscriber| subscriber.id != id);
                }
            })),
        }
    }

    fn queue_subscribe(&self, subject: &str, queue_group: &str, handler: Handler) -> SubscriptionHandle {
        let (id, tx) = Self::spawn_subscriber(handler);
        let key = (subject.to_string(), queue_group.to_string());
        self.inner
            .queue_groups
            .write()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .members
            .push(Subscriber { id, tx });

        let inner = self.inner.clone();
        SubscriptionHandle {
            id,
            on_drop: Some(Box::new(move |id| {
                if let Some(group) = inner.queue_groups.write().unwrap().get_mut(&key) {
                    group.members.retain(|subscriber| subscriber.id != id);
                }
            })),
        }
    }

    fn subscribe_wildcard(&self, pattern: &str, handler: Handler) -> SubscriptionHandle {
        let (id, tx) = Self::spawn_subscriber(handler);
        self.inner.wildcard.write().unwrap().push((pattern.to_string(), Subscriber { id, tx }));

        let inner = self.inner.clone();
        SubscriptionHandle {
            id,
            on_drop: Some(Box::new(move |id| {
                inner.wildcard.write().unwrap().retain(|(_, subscriber)| subscriber.id != id);
            })),
        }
    }
}

/// Match a subject against a pattern where `>` matches one or more
/// trailing segments; every other segment must match exactly
/// (spec.md §3, §6 — no single-segment `*` wildcard is specified).
pub fn match_subject(pattern: &str, subject: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let subject_segments: Vec<&str> = subject.split('.').collect();

    for (index, pattern_segment) in pattern_segments.iter().enumerate() {
        if *pattern_segment == ">" {
            return index < subject_segments.len();
        }
        match subject_segments.get(index) {
            Some(subject_segment) if subject_segment == pattern_segment => continue,
            _ => return false,
        }
    }

    pattern_segments.len() == subject_segments.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::subjects;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn wildcard_matches_trailing_segments_only() {
        assert!(match_subject(subjects::MESSAGE_WILDCARD, subjects::MESSAGE_CREATE));
        assert!(match_subject(subjects::MESSAGE_WILDCARD, subjects::MESSAGE_DELETE));
        assert!(!match_subject(subjects::MESSAGE_WILDCARD, subjects::GUILD_BAN_ADD));
        assert!(!match_subject("amityvox.message.>", "amityvox.message"));
    }

    fn counting_handler(counter: Arc<AtomicU32>) -> Handler {
        Arc::new(move |_subject, _envelope| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn fan_out_delivers_to_every_subscriber() {
        let broker = InMemoryBroker::new();
        let a = Arc::new(AtomicU32::new(0));
        let b = Arc::new(AtomicU32::new(0));
        let _h1 = broker.subscribe(subjects::MESSAGE_CREATE, counting_handler(a.clone()));
        let _h2 = broker.subscribe(subjects::MESSAGE_CREATE, counting_handler(b.clone()));

        let envelope = EventEnvelope::new("MESSAGE_CREATE", serde_json::json!({})).unwrap();
        broker.publish(subjects::MESSAGE_CREATE, envelope).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queue_group_delivers_to_exactly_one_member() {
        let broker = InMemoryBroker::new();
        let a = Arc::new(AtomicU32::new(0));
        let b = Arc::new(AtomicU32::new(0));
        let _h1 = broker.queue_subscribe(subjects::MEDIA_TRANSCODE, "transcode-workers", counting_handler(a.clone()));
        let _h2 = broker.queue_subscribe(subjects::MEDIA_TRANSCODE, "transcode-workers", counting_handler(b.clone()));

        for _ in 0..4 {
            let envelope = EventEnvelope::new("MEDIA_TRANSCODE", serde_json::json!({})).unwrap();
            broker.publish(subjects::MEDIA_TRANSCODE, envelope).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(a.load(Ordering::SeqCst) + b.load(Ordering::SeqCst), 4);
        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropping_handle_unsubscribes() {
        let broker = InMemoryBroker::new();
        let counter = Arc::new(AtomicU32::new(0));
        let handle = broker.subscribe(subjects::MESSAGE_CREATE, counting_handler(counter.clone()));
        drop(handle);

        let envelope = EventEnvelope::new("MESSAGE_CREATE", serde_json::json!({})).unwrap();
        broker.publish(subjects::MESSAGE_CREATE, envelope).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(broker.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_kill_the_subscription() {
        let broker = InMemoryBroker::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_for_handler = counter.clone();
        let handler: Handler = Arc::new(move |_subject, envelope| {
            let counter = counter_for_handler.clone();
            Box::pin(async move {
                let marker: serde_json::Value = envelope.data;
                if marker == serde_json::json!({"boom": true}) {
                    panic!("simulated handler panic");
                }
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        let _handle = broker.subscribe(subjects::MESSAGE_CREATE, handler);

        let boom = EventEnvelope::new("MESSAGE_CREATE", serde_json::json!({"boom": true})).unwrap();
        broker.publish(subjects::MESSAGE_CREATE, boom).await.unwrap();
        let ok = EventEnvelope::new("MESSAGE_CREATE", serde_json::json!({})).unwrap();
        broker.publish(subjects::MESSAGE_CREATE, ok).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
