//! MessageBroker Adapter (spec.md §4.1): a thin façade over a pub/sub
//! broker exposing publish, subscribe (unique), queue-subscribe
//! (competing), and wildcard-subscribe.

mod inmemory;
mod traits;

pub use inmemory::{match_subject, InMemoryBroker};
pub use traits::{publish_event, Broker, BrokerDyn, Handler, SubscriptionHandle};
