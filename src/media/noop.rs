//! Default `MediaPort`: transcoding is a genuine external collaborator
//! (spec.md §1) and is logged-and-skipped here; embed unfurling is
//! delegated to the real in-process `HttpEmbedUnfurler` so the
//! `embed-worker` stays a working default rather than a dead stub.

use super::{EmbedMetadata, HttpEmbedUnfurler, MediaPort, TranscodeRequest};
use crate::error::Result;

pub struct NoopMediaPort {
    unfurler: HttpEmbedUnfurler,
}

impl Default for NoopMediaPort {
    fn default() -> Self {
        Self::new()
    }
}

impl NoopMediaPort {
    pub fn new() -> Self {
        Self { unfurler: HttpEmbedUnfurler::new() }
    }
}

impl MediaPort for NoopMediaPort {
    async fn transcode(&self, request: TranscodeRequest) -> Result<()> {
        tracing::info!(media_id = %request.media_id, content_type = %request.content_type, "transcode requested, no transcoding backend configured");
        Ok(())
    }

    async fn embed_unfurl(&self, url: &str) -> Result<EmbedMetadata> {
        self.unfurler.unfurl(url).await
    }
}
