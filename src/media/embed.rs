//! In-process link-embed unfurler (spec.md §9 Open Question 3): fetch a
//! URL under a bounded timeout and bounded body read, then extract
//! `og:*` meta tags, falling back to `<title>` and
//! `meta[name=description]`.

use crate::error::Result;
use anyhow::Context;
use regex::Regex;
use std::time::Duration;

const UNFURL_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BODY_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbedMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub site_name: Option<String>,
}

pub struct HttpEmbedUnfurler {
    client: reqwest::Client,
}

impl Default for HttpEmbedUnfurler {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpEmbedUnfurler {
    pub fn new() -> Self {
        let client = reqwest::Client::builder().timeout(UNFURL_TIMEOUT).build().expect("reqwest client builds");
        Self { client }
    }

    /// Fetch `url` and extract embed metadata. Errors on transport
    /// failure; a successful fetch with no matching tags returns default
    /// (all-`None`) metadata rather than an error.
    pub async fn unfurl(&self, url: &str) -> Result<EmbedMetadata> {
        let response = self.client.get(url).send().await.context("embed unfurl request failed")?;
        let mut body = Vec::with_capacity(8 * 1024);
        let mut stream = response;
        while let Some(chunk) = stream.chunk().await.context("reading embed unfurl response body")? {
            if body.len() + chunk.len() > MAX_BODY_BYTES {
                let remaining = MAX_BODY_BYTES - body.len();
                body.extend_from_slice(&chunk[..remaining]);
                break;
            }
            body.extend_from_slice(&chunk);
        }
        let html = String::from_utf8_lossy(&body);
        Ok(extract_metadata(&html))
    }
}

fn extract_metadata(html: &str) -> EmbedMetadata {
    EmbedMetadata {
        title: extract_og(html, "og:title").or_else(|| extract_title_tag(html)),
        description: extract_og(html, "og:description").or_else(|| extract_meta_name(html, "description")),
        image_url: extract_og(html, "og:image"),
        site_name: extract_og(html, "og:site_name"),
    }
}

fn extract_og(html: &str, property: &str) -> Option<String> {
    let pattern = format!(
        r#"<meta[^>]+property=["']{}["'][^>]+content=["']([^"']*)["']"#,
        regex::escape(property)
    );
    let regex = Regex::new(&pattern).ok()?;
    regex.captures(html).map(|captures| decode_entities(&captures[1]))
}

fn extract_title_tag(html: &str) -> Option<String> {
    let regex = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok()?;
    regex.captures(html).map(|captures| decode_entities(captures[1].trim()))
}

fn extract_meta_name(html: &str, name: &str) -> Option<String> {
    let pattern = format!(r#"<meta[^>]+name=["']{}["'][^>]+content=["']([^"']*)["']"#, regex::escape(name));
    let regex = Regex::new(&pattern).ok()?;
    regex.captures(html).map(|captures| decode_entities(&captures[1]))
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&amp;", "&").replace("&lt;", "<").replace("&gt;", ">").replace("&quot;", "\"").replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_og_tags_over_fallback() {
        let html = r#"<html><head>
            <meta property="og:title" content="OG Title">
            <title>Fallback Title</title>
        </head></html>"#;
        let metadata = extract_metadata(html);
        assert_eq!(metadata.title.as_deref(), Some("OG Title"));
    }

    #[test]
    fn falls_back_to_title_tag_when_no_og_title() {
        let html = "<html><head><title>Just a title</title></head></html>";
        let metadata = extract_metadata(html);
        assert_eq!(metadata.title.as_deref(), Some("Just a title"));
    }

    #[test]
    fn falls_back_to_meta_description() {
        let html = r#"<html><head><meta name="description" content="A page about things"></head></html>"#;
        let metadata = extract_metadata(html);
        assert_eq!(metadata.description.as_deref(), Some("A page about things"));
    }

    #[test]
    fn missing_tags_yield_none_not_error() {
        let metadata = extract_metadata("<html><body>nothing here</body></html>");
        assert!(metadata.title.is_none());
        assert!(metadata.description.is_none());
    }

    #[test]
    fn decodes_basic_html_entities() {
        let html = r#"<meta property="og:title" content="Fish &amp; Chips">"#;
        let metadata = extract_metadata(html);
        assert_eq!(metadata.title.as_deref(), Some("Fish & Chips"));
    }
}
