//! Reading the configured source list.
//!
//! The sources file is plain UTF-8, one source per line:
//!
//! ```text
//! # comments and blank lines are ignored
//! https://example.com/feed.xml
//! HTML: https://example.com/news/
//! ```
//!
//! Lines prefixed with `HTML:` are scraped as listing pages; everything else
//! is treated as a feed URL.

use crate::models::SourceDescriptor;
use std::error::Error;
use std::io::ErrorKind;
use tokio::fs;
use tracing::{info, instrument, warn};

/// Prefix marking a line as an HTML listing source. Case-sensitive.
pub const HTML_PREFIX: &str = "HTML:";

/// Load source descriptors from `path`, preserving file order.
///
/// A missing file is not fatal: a warning is logged and an empty list is
/// returned, which makes the run a no-op.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
#[instrument(level = "info", skip_all, fields(%path))]
pub async fn load_sources(path: &str) -> Result<Vec<SourceDescriptor>, Box<dyn Error>> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("Sources file not found; continuing with no sources");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let sources = parse_sources(&text);
    info!(count = sources.len(), "Loaded sources");
    Ok(sources)
}

/// Parse the contents of a sources file.
pub fn parse_sources(text: &str) -> Vec<SourceDescriptor> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match line.strip_prefix(HTML_PREFIX) {
            Some(rest) => SourceDescriptor::html_listing(rest.trim()),
            None => SourceDescriptor::feed(line),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    #[test]
    fn test_parse_sources_mixed() {
        let text = "  \n#comment\nHTML: https://x.test/news/\nhttps://y.test/feed.xml\n";
        let sources = parse_sources(text);

        assert_eq!(
            sources,
            vec![
                SourceDescriptor::html_listing("https://x.test/news/"),
                SourceDescriptor::feed("https://y.test/feed.xml"),
            ]
        );
    }

    #[test]
    fn test_parse_sources_keeps_order_and_trims() {
        let text = "https://b.test/rss\n\t https://a.test/atom \nHTML:https://c.test/\n";
        let sources = parse_sources(text);

        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0].locator, "https://b.test/rss");
        assert_eq!(sources[1].locator, "https://a.test/atom");
        assert_eq!(sources[2].locator, "https://c.test/");
        assert_eq!(sources[2].kind, SourceKind::HtmlListing);
    }

    #[test]
    fn test_parse_sources_prefix_is_case_sensitive() {
        let sources = parse_sources("html: https://x.test/news/\n");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].kind, SourceKind::Feed);
        assert_eq!(sources[0].locator, "html: https://x.test/news/");
    }

    #[test]
    fn test_parse_sources_indented_comment() {
        let sources = parse_sources("   # disabled: https://x.test/feed\n");
        assert!(sources.is_empty());
    }

    #[tokio::test]
    async fn test_load_sources_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.txt");

        let sources = load_sources(path.to_str().unwrap()).await.unwrap();
        assert!(sources.is_empty());
    }

    #[tokio::test]
    async fn test_load_sources_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rss_sources.txt");
        std::fs::write(
            &path,
            "  \n#comment\nHTML: https://x.test/news/\nhttps://y.test/feed.xml\n",
        )
        .unwrap();

        let sources = load_sources(path.to_str().unwrap()).await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].kind, SourceKind::HtmlListing);
        assert_eq!(sources[0].locator, "https://x.test/news/");
        assert_eq!(sources[1].kind, SourceKind::Feed);
        assert_eq!(sources[1].locator, "https://y.test/feed.xml");
    }
}
