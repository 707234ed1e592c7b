//! `SearchPort` (spec.md §6 config object): the search-indexing
//! collaborator the `search-sync` periodic job and `search-indexer`
//! event worker depend on. An explicit Non-goal (spec.md §1 lists the
//! federation mesh and external services generally as collaborators);
//! this crate defines only the seam.

use crate::error::Result;
use crate::events::EventEnvelope;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

pub trait SearchPort: Send + Sync + 'static {
    /// Incremental sync covering everything changed since `since`
    /// (spec.md §4.3 search-sync: "10-minute look-back window").
    fn sync_since(&self, since: DateTime<Utc>) -> impl Future<Output = Result<u64>> + Send;

    /// Index a single message-domain event observed by the
    /// `search-indexer` worker (spec.md §4.3, wildcard `amityvox.message.>`).
    fn index_event(&self, subject: &str, envelope: &EventEnvelope) -> impl Future<Output = Result<()>> + Send;
}

pub trait SearchPortDyn: Send + Sync + 'static {
    fn sync_since<'a>(&'a self, since: DateTime<Utc>) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>>;

    fn index_event<'a>(&'a self, subject: &'a str, envelope: &'a EventEnvelope) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

impl<T: SearchPort> SearchPortDyn for T {
    fn sync_since<'a>(&'a self, since: DateTime<Utc>) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        Box::pin(SearchPort::sync_since(self, since))
    }

    fn index_event<'a>(&'a self, subject: &'a str, envelope: &'a EventEnvelope) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(SearchPort::index_event(self, subject, envelope))
    }
}
