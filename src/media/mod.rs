//! Media Port (SPEC_FULL.md §5.10): media transcoding and link-embed
//! unfurling are external-collaborator concerns (spec.md §1), but the
//! registered-worker table still lists `transcode-worker` and
//! `embed-worker`, so this seam keeps both real rather than dead stubs.

mod embed;
mod noop;

pub use embed::{EmbedMetadata, HttpEmbedUnfurler};
pub use noop::NoopMediaPort;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Input to a transcode request: the media's storage key and its
/// declared content type. The actual transcoding tool is an external
/// collaborator (spec.md §1); this port only defines the seam. Doubles
/// as the `amityvox.media.transcode` event payload, published by the
/// (out-of-scope) media upload path and consumed by `transcode-worker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeRequest {
    pub media_id: String,
    pub source_key: String,
    pub content_type: String,
}

/// The `amityvox.media.embed_unfurl` event payload, consumed by
/// `embed-worker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedUnfurlRequest {
    pub url: String,
}

pub trait MediaPort: Send + Sync + 'static {
    fn transcode(&self, request: TranscodeRequest) -> impl Future<Output = Result<()>> + Send;

    fn embed_unfurl(&self, url: &str) -> impl Future<Output = Result<EmbedMetadata>> + Send;
}

pub trait MediaPortDyn: Send + Sync + 'static {
    fn transcode<'a>(&'a self, request: TranscodeRequest) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn embed_unfurl<'a>(&'a self, url: &'a str) -> Pin<Box<dyn Future<Output = Result<EmbedMetadata>> + Send + 'a>>;
}

impl<T: MediaPort> MediaPortDyn for T {
    fn transcode<'a>(&'a self, request: TranscodeRequest) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(MediaPort::transcode(self, request))
    }

    fn embed_unfurl<'a>(&'a self, url: &'a str) -> Pin<Box<dyn Future<Output = Result<EmbedMetadata>> + Send + 'a>> {
        Box::pin(MediaPort::embed_unfurl(self, url))
    }
}
