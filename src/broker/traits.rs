//! Broker trait and its dynamic-dispatch companion.
//!
//! A type-safe trait using native `async fn` for implementers, and a
//! hand-written object-safe companion (returning boxed futures) with a
//! blanket impl bridging the two, so callers can hold `Arc<dyn BrokerDyn>`
//! without every implementation paying the boxing cost itself.

use crate::error::{BrokerError, Result};
use crate::events::EventEnvelope;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A subscription's message handler. Handlers must be idempotent and
/// complete in bounded time (spec.md §4.1) — they run on the broker's
/// internal dispatch tasks, not inline with `publish`.
pub type Handler =
    Arc<dyn Fn(String, EventEnvelope) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Opaque token that, when dropped, unsubscribes and drops buffered
/// messages for that subscriber (spec.md §3 "Subscription Handle").
pub struct SubscriptionHandle {
    pub(crate) id: uuid::Uuid,
    pub(crate) on_drop: Option<Box<dyn FnOnce(uuid::Uuid) + Send>>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle").field("id", &self.id).finish()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop(self.id);
        }
    }
}

/// Static trait for broker implementations. Use this to implement a new
/// backing transport (e.g. a real NATS/JetStream client).
pub trait Broker: Send + Sync + 'static {
    /// Fire-and-forget publish. Fails with `BrokerError::Publish` if the
    /// broker rejects the message. Ordering: publications from a single
    /// publisher are delivered to any given subscriber in the order
    /// published (spec.md §4.1, §5).
    fn publish(
        &self,
        subject: &str,
        envelope: EventEnvelope,
    ) -> impl Future<Output = std::result::Result<(), BrokerError>> + Send;

    /// Every subscriber on a subject sees every message (fan-out).
    fn subscribe(&self, subject: &str, handler: Handler) -> SubscriptionHandle;

    /// Competing consumers within `queue_group`; each message is
    /// delivered to exactly one member.
    fn queue_subscribe(&self, subject: &str, queue_group: &str, handler: Handler) -> SubscriptionHandle;

    /// Pattern matches subject segments; `>` matches one or more
    /// trailing segments.
    fn subscribe_wildcard(&self, pattern: &str, handler: Handler) -> SubscriptionHandle;

    /// Convenience publisher: serializes `payload`, stamps `event_type`,
    /// and publishes — equivalent to `publish` after envelope
    /// construction (spec.md §4.1).
    fn publish_guild_event(
        &self,
        subject: &str,
        event_type: &str,
        _guild_id: &str,
        payload: impl serde::Serialize + Send,
    ) -> impl Future<Output = std::result::Result<(), BrokerError>> + Send
    where
        Self: Sized,
    {
        async move {
            let envelope = EventEnvelope::new(event_type, payload).map_err(|error| BrokerError::Publish {
                subject: subject.to_string(),
                reason: error.to_string(),
            })?;
            self.publish(subject, envelope).await
        }
    }

    /// Convenience publisher for channel-scoped events (spec.md §4.1).
    fn publish_channel_event(
        &self,
        subject: &str,
        event_type: &str,
        _channel_id: &str,
        payload: impl serde::Serialize + Send,
    ) -> impl Future<Output = std::result::Result<(), BrokerError>> + Send
    where
        Self: Sized,
    {
        async move {
            let envelope = EventEnvelope::new(event_type, payload).map_err(|error| BrokerError::Publish {
                subject: subject.to_string(),
                reason: error.to_string(),
            })?;
            self.publish(subject, envelope).await
        }
    }
}

/// Dynamic trait for runtime polymorphism: `Arc<dyn BrokerDyn>` is the
/// handle type held by the Worker Manager and every port that needs to
/// publish.
pub trait BrokerDyn: Send + Sync + 'static {
    fn publish<'a>(
        &'a self,
        subject: &'a str,
        envelope: EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), BrokerError>> + Send + 'a>>;

    fn subscribe(&self, subject: &str, handler: Handler) -> SubscriptionHandle;

    fn queue_subscribe(&self, subject: &str, queue_group: &str, handler: Handler) -> SubscriptionHandle;

    fn subscribe_wildcard(&self, pattern: &str, handler: Handler) -> SubscriptionHandle;
}

impl<T: Broker> BrokerDyn for T {
    fn publish<'a>(
        &'a self,
        subject: &'a str,
        envelope: EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(Broker::publish(self, subject, envelope))
    }

    fn subscribe(&self, subject: &str, handler: Handler) -> SubscriptionHandle {
        Broker::subscribe(self, subject, handler)
    }

    fn queue_subscribe(&self, subject: &str, queue_group: &str, handler: Handler) -> SubscriptionHandle {
        Broker::queue_subscribe(self, subject, queue_group, handler)
    }

    fn subscribe_wildcard(&self, pattern: &str, handler: Handler) -> SubscriptionHandle {
        Broker::subscribe_wildcard(self, pattern, handler)
    }
}

/// Publish a pre-serialized payload on `subject` through a `dyn BrokerDyn`
/// handle, stamping `event_type`. Used by code that only holds
/// `Arc<dyn BrokerDyn>` and so can't call the generic `Broker` trait's
/// convenience methods directly.
pub async fn publish_event(
    bus: &dyn BrokerDyn,
    subject: &str,
    event_type: &str,
    payload: impl serde::Serialize,
) -> std::result::Result<(), BrokerError> {
    let envelope = EventEnvelope::new(event_type, payload).map_err(|error| BrokerError::Publish {
        subject: subject.to_string(),
        reason: error.to_string(),
    })?;
    bus.publish(subject, envelope).await
}
