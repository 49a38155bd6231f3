//! RSS and Atom feed fetcher.
//!
//! Feeds are read with a streaming XML reader so that a damaged document still
//! yields what can be recovered. A mismatched end tag (a stray `<br>` in a
//! title is the usual culprit) closes every element opened after the matching
//! start tag, and an end tag with no matching start is skipped. A syntax error
//! stops the parse, keeping the items completed before it. In every case the
//! first fault is reported instead of failing the source.
//!
//! # Field Resolution
//!
//! Upstream feeds disagree on field names. [`FeedItem::into_entry`] is the
//! single place where they are reconciled:
//!
//! | Entry field | Tried in order |
//! |-------------|----------------|
//! | `identity_key` | `id`, `guid`, `link` |
//! | `title` | `title` |
//! | `link` | `link` (text, or Atom `href`) |
//! | `published` | `published` / `pubDate` / `dc:date`, then `updated` |
//! | `body_html` | `summary`, `description`, then `content` / `content:encoded` |

use super::{FetchPage, Fetched, SourceFetcher};
use crate::models::{Entry, SourceReport};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Raw item fields as they appeared in the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub id: Option<String>,
    pub guid: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub published: Option<String>,
    pub updated: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
}

impl FeedItem {
    /// Resolve the raw fields into an [`Entry`].
    pub fn into_entry(self) -> Entry {
        let link = first_filled([self.link]);
        Entry {
            identity_key: first_filled([self.id, self.guid, Some(link.clone())]),
            title: first_filled([self.title]),
            published: first_filled([self.published, self.updated]),
            body_html: first_filled([self.summary, self.description, self.content]),
            link,
        }
    }
}

fn first_filled<const N: usize>(candidates: [Option<String>; N]) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

/// Result of parsing a feed document.
#[derive(Debug, Default)]
pub struct ParsedFeed {
    /// Items that were completed, including those after a recovered fault.
    pub items: Vec<FeedItem>,
    /// The first fault met while parsing, if any.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Guid,
    Link,
    Title,
    Published,
    Updated,
    Summary,
    Description,
    Content,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        let field = match name {
            "id" => Field::Id,
            "guid" => Field::Guid,
            "link" => Field::Link,
            "title" => Field::Title,
            "published" | "pubDate" | "dc:date" | "issued" => Field::Published,
            "updated" | "modified" => Field::Updated,
            "summary" => Field::Summary,
            "description" => Field::Description,
            "content" | "content:encoded" => Field::Content,
            _ => return None,
        };
        Some(field)
    }

    fn slot(self, item: &mut FeedItem) -> &mut Option<String> {
        match self {
            Field::Id => &mut item.id,
            Field::Guid => &mut item.guid,
            Field::Link => &mut item.link,
            Field::Title => &mut item.title,
            Field::Published => &mut item.published,
            Field::Updated => &mut item.updated,
            Field::Summary => &mut item.summary,
            Field::Description => &mut item.description,
            Field::Content => &mut item.content,
        }
    }

    /// Store the trimmed `value` unless the slot already holds something;
    /// first wins.
    fn fill(self, item: &mut FeedItem, value: &str) {
        let slot = self.slot(item);
        let value = value.trim();
        if slot.is_none() && !value.is_empty() {
            *slot = Some(value.to_string());
        }
    }
}

fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn is_feed_root(e: &BytesStart<'_>) -> bool {
    matches!(e.local_name().as_ref(), b"rss" | b"feed" | b"RDF")
}

fn is_item(e: &BytesStart<'_>) -> bool {
    matches!(e.local_name().as_ref(), b"item" | b"entry")
}

/// `href` of an Atom link that points at the article itself.
fn atom_href(e: &BytesStart<'_>) -> Option<String> {
    let mut href = None;
    let mut rel = None;
    for attr in e.attributes().flatten() {
        let value = attr.unescape_value().ok()?.into_owned();
        match attr.key.as_ref() {
            b"href" => href = Some(value),
            b"rel" => rel = Some(value),
            _ => {}
        }
    }
    match rel.as_deref() {
        None | Some("alternate") => href,
        Some(_) => None,
    }
}

/// Unescape XML text, falling back to HTML entity decoding for feeds that use
/// entities XML does not define (`&nbsp;`, `&mdash;`, ...).
fn text_of(t: &BytesText<'_>) -> String {
    match t.unescape() {
        Ok(text) => text.into_owned(),
        Err(_) => html_escape::decode_html_entities(&String::from_utf8_lossy(t)).into_owned(),
    }
}

/// Item being collected and the field whose text is being read.
#[derive(Debug, Default)]
struct ItemState {
    current: Option<FeedItem>,
    item_depth: usize,
    field: Option<Field>,
    text: String,
}

impl ItemState {
    /// Close the element open at `depth`.
    fn close(&mut self, depth: usize, items: &mut Vec<FeedItem>) {
        let Some(item) = self.current.as_mut() else {
            return;
        };
        if depth == self.item_depth + 1 {
            if let Some(f) = self.field.take() {
                f.fill(item, &self.text);
                self.text.clear();
            }
        } else if depth == self.item_depth {
            items.extend(self.current.take());
        }
    }
}

/// Parse an RSS 2.0, RSS 1.0 (RDF) or Atom document.
pub fn parse_feed(xml: &str) -> ParsedFeed {
    let mut reader = Reader::from_str(xml);
    // end tags are matched against `open` below
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut parsed = ParsedFeed::default();
    let mut seen_root = false;
    let mut open: Vec<String> = Vec::new();
    let mut state = ItemState::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                open.push(qualified_name(&e));
                if !seen_root {
                    if !is_feed_root(&e) {
                        parsed.error = Some(format!(
                            "not an RSS or Atom document (root element <{}>)",
                            qualified_name(&e)
                        ));
                        return parsed;
                    }
                    seen_root = true;
                    continue;
                }

                let depth = open.len();
                match state.current.as_mut() {
                    None => {
                        if is_item(&e) {
                            state.current = Some(FeedItem::default());
                            state.item_depth = depth;
                        }
                    }
                    Some(item) => {
                        if depth == state.item_depth + 1 {
                            state.field = Field::from_name(&qualified_name(&e));
                            state.text.clear();
                            if state.field == Some(Field::Link) {
                                if let Some(href) = atom_href(&e) {
                                    Field::Link.fill(item, &href);
                                }
                            }
                        }
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if !seen_root {
                    parsed.error = Some(format!(
                        "not an RSS or Atom document (root element <{}/>)",
                        qualified_name(&e)
                    ));
                    return parsed;
                }
                if let Some(item) = state.current.as_mut() {
                    if open.len() == state.item_depth && qualified_name(&e) == "link" {
                        if let Some(href) = atom_href(&e) {
                            Field::Link.fill(item, &href);
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if state.field.is_some() {
                    state.text.push_str(&text_of(&t));
                }
            }
            Ok(Event::CData(c)) => {
                if state.field.is_some() {
                    state.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let Some(pos) = open.iter().rposition(|n| *n == name) else {
                    warn!(tag = %name, "Skipping unmatched end tag");
                    parsed.error.get_or_insert_with(|| {
                        format!(
                            "malformed feed: unexpected </{name}> (near byte {})",
                            reader.buffer_position()
                        )
                    });
                    continue;
                };
                if pos + 1 != open.len() {
                    let expected = open.last().cloned().unwrap_or_default();
                    warn!(%expected, found = %name, "Closing unclosed elements");
                    parsed.error.get_or_insert_with(|| {
                        format!(
                            "malformed feed: expected </{expected}>, but </{name}> was found (near byte {})",
                            reader.buffer_position()
                        )
                    });
                }
                while open.len() > pos {
                    state.close(open.len(), &mut parsed.items);
                    open.pop();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                let message = format!(
                    "malformed feed: {e} (near byte {})",
                    reader.buffer_position()
                );
                parsed.error.get_or_insert(message);
                return parsed;
            }
            _ => {}
        }
    }

    if !seen_root {
        parsed.error = Some("empty document: no RSS or Atom root element".to_string());
    } else if !open.is_empty() {
        parsed.error.get_or_insert_with(|| {
            format!("truncated feed: {} element(s) left open", open.len())
        });
    }
    parsed
}

/// Fetches structured feeds.
#[derive(Debug)]
pub struct FeedFetcher<'a, C> {
    client: &'a C,
    timeout: Duration,
}

impl<'a, C: FetchPage> FeedFetcher<'a, C> {
    pub fn new(client: &'a C, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl<C: FetchPage> SourceFetcher for FeedFetcher<'_, C> {
    #[instrument(level = "info", skip_all, fields(%locator))]
    async fn fetch(&self, locator: &str) -> Fetched {
        let mut report = SourceReport::new(locator);

        let body = match self.client.get_text(locator, self.timeout).await {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Feed fetch failed");
                report.error(format!("feed fetch failed: {e}"));
                return (Vec::new(), report);
            }
        };

        let parsed = parse_feed(&body);
        if let Some(err) = parsed.error {
            warn!(error = %err, recovered = parsed.items.len(), "Feed parse incomplete");
            report.error(err);
        }

        let entries: Vec<Entry> = parsed.items.into_iter().map(FeedItem::into_entry).collect();
        report.fetched = entries.len();
        info!(count = entries.len(), "Parsed feed entries");
        (entries, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubPages;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Rally news</title>
    <link>https://rally.test/</link>
    <item>
      <title>  Stage 1 report  </title>
      <link>https://rally.test/stage-1</link>
      <guid isPermaLink="false">rally-1</guid>
      <pubDate>Tue, 06 May 2025 10:00:00 GMT</pubDate>
      <description><![CDATA[<p>Fast <b>gravel</b> stage</p>]]></description>
    </item>
    <item>
      <title>Stage 2 report</title>
      <link> https://rally.test/stage-2 </link>
      <description>Rain &amp; mud</description>
      <content:encoded><![CDATA[<p>Long form</p>]]></content:encoded>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Drift</title>
  <link href="https://drift.test/"/>
  <entry>
    <title>Round 3</title>
    <link rel="enclosure" href="https://drift.test/r3.mp4"/>
    <link rel="alternate" href="https://drift.test/round-3"/>
    <id>tag:drift.test,2025:3</id>
    <updated>2025-05-06T12:00:00Z</updated>
    <summary>Tandem battles</summary>
    <author><name>Editor</name></author>
  </entry>
  <entry>
    <title>Round 4</title>
    <link href="https://drift.test/round-4"/>
    <published>2025-05-07T09:00:00Z</published>
    <updated>2025-05-07T10:00:00Z</updated>
    <content type="html">&lt;p&gt;Qualifying&lt;/p&gt;</content>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_items() {
        let parsed = parse_feed(RSS);
        assert!(parsed.error.is_none(), "{:?}", parsed.error);
        assert_eq!(parsed.items.len(), 2);

        let first = parsed.items[0].clone().into_entry();
        assert_eq!(first.identity_key, "rally-1");
        assert_eq!(first.title, "Stage 1 report");
        assert_eq!(first.link, "https://rally.test/stage-1");
        assert_eq!(first.published, "Tue, 06 May 2025 10:00:00 GMT");
        assert_eq!(first.body_html, "<p>Fast <b>gravel</b> stage</p>");

        let second = parsed.items[1].clone().into_entry();
        assert_eq!(second.identity_key, "https://rally.test/stage-2");
        assert_eq!(second.link, "https://rally.test/stage-2");
        assert_eq!(second.published, "");
        assert_eq!(second.body_html, "Rain & mud");
    }

    #[test]
    fn test_channel_fields_do_not_leak_into_items() {
        let parsed = parse_feed(RSS);
        assert!(parsed.items.iter().all(|i| i.title.as_deref() != Some("Rally news")));
    }

    #[test]
    fn test_parse_atom_entries() {
        let parsed = parse_feed(ATOM);
        assert!(parsed.error.is_none(), "{:?}", parsed.error);
        assert_eq!(parsed.items.len(), 2);

        let first = parsed.items[0].clone().into_entry();
        assert_eq!(first.identity_key, "tag:drift.test,2025:3");
        assert_eq!(first.link, "https://drift.test/round-3");
        assert_eq!(first.published, "2025-05-06T12:00:00Z");
        assert_eq!(first.body_html, "Tandem battles");

        let second = parsed.items[1].clone().into_entry();
        assert_eq!(second.identity_key, "https://drift.test/round-4");
        assert_eq!(second.published, "2025-05-07T09:00:00Z");
        assert_eq!(second.body_html, "<p>Qualifying</p>");
    }

    #[test]
    fn test_parse_rdf_items() {
        let rdf = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel rdf:about="https://x.test/"><title>X</title></channel>
  <item rdf:about="https://x.test/1">
    <title>One</title>
    <link>https://x.test/1</link>
    <dc:date>2025-05-06</dc:date>
  </item>
</rdf:RDF>"#;
        let parsed = parse_feed(rdf);
        assert!(parsed.error.is_none(), "{:?}", parsed.error);
        assert_eq!(parsed.items.len(), 1);
        let entry = parsed.items[0].clone().into_entry();
        assert_eq!(entry.link, "https://x.test/1");
        assert_eq!(entry.published, "2025-05-06");
    }

    #[test]
    fn test_stray_end_tag_does_not_stop_parse() {
        let xml = "<rss><channel><item><title>A</p></title><link>https://x.test/a</link></item><item><title>B</title><link>https://x.test/b</link></item></channel></rss>";
        let parsed = parse_feed(xml);
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].title.as_deref(), Some("A"));
    }

    #[test]
    fn test_unmatched_end_tag_is_skipped() {
        let xml = r#"<rss><channel>
  <item><title>A</title><link>https://x.test/a</link></item>
  <item><title>B</title><link>https://x.test/b</link></item>
  <item><title>C</titel></item>
</channel></rss>"#;
        let parsed = parse_feed(xml);
        assert_eq!(parsed.items.len(), 3);
        assert_eq!(parsed.items[2].title.as_deref(), Some("C"));
        assert!(parsed.error.unwrap().starts_with("malformed feed: unexpected </titel>"));
    }

    #[test]
    fn test_unclosed_tag_in_title_keeps_later_items() {
        let xml = r#"<rss><channel>
  <item><title>A</title><link>https://x.test/a</link></item>
  <item><title>B<br></title><link>https://x.test/b</link></item>
  <item><title>C</title><link>https://x.test/c</link></item>
</channel></rss>"#;
        let parsed = parse_feed(xml);

        let links: Vec<_> = parsed.items.iter().map(|i| i.link.as_deref()).collect();
        assert_eq!(
            links,
            vec![Some("https://x.test/a"), Some("https://x.test/b"), Some("https://x.test/c")]
        );
        assert_eq!(parsed.items[1].title.as_deref(), Some("B"));
        let err = parsed.error.unwrap();
        assert!(err.starts_with("malformed feed: expected </br>, but </title> was found"), "{err}");
    }

    #[test]
    fn test_syntax_error_keeps_completed_items() {
        let xml = "<rss><channel><item><title>A</title><link>https://x.test/a</link></item><item><title>B</title><!-- cut";
        let parsed = parse_feed(xml);
        assert_eq!(parsed.items.len(), 1);
        assert!(parsed.error.unwrap().starts_with("malformed feed: "));
    }

    #[test]
    fn test_text_around_cdata_keeps_inner_spaces() {
        let xml = "<rss><channel><item><link>https://x.test/a</link><description>  Intro <![CDATA[<b>bold</b>]]> outro\n</description></item></channel></rss>";
        let parsed = parse_feed(xml);
        assert_eq!(
            parsed.items[0].description.as_deref(),
            Some("Intro <b>bold</b> outro")
        );
    }

    #[test]
    fn test_truncated_feed_reports_error() {
        let xml = "<rss><channel><item><title>A</title><link>https://x.test/a</link></item><item><title>B";
        let parsed = parse_feed(xml);
        assert_eq!(parsed.items.len(), 1);
        assert!(parsed.error.is_some());
    }

    #[test]
    fn test_html_document_is_not_a_feed() {
        let parsed = parse_feed("<html><body>Not found</body></html>");
        assert!(parsed.items.is_empty());
        assert!(parsed.error.unwrap().contains("<html>"));
    }

    #[test]
    fn test_html_entities_in_text() {
        let xml = "<rss><channel><item><title>Caf&eacute;&nbsp;news</title><link>https://x.test/c</link></item></channel></rss>";
        let parsed = parse_feed(xml);
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].title.as_deref(), Some("Café\u{a0}news"));
    }

    #[test]
    fn test_identity_key_empty_when_nothing_identifies_item() {
        let entry = FeedItem {
            title: Some("Orphan".to_string()),
            ..FeedItem::default()
        }
        .into_entry();
        assert_eq!(entry.identity_key, "");
        assert!(!entry.is_trackable());
    }

    #[test]
    fn test_id_preferred_over_guid_and_link() {
        let entry = FeedItem {
            id: Some("id-1".to_string()),
            guid: Some("guid-1".to_string()),
            link: Some("https://x.test/1".to_string()),
            ..FeedItem::default()
        }
        .into_entry();
        assert_eq!(entry.identity_key, "id-1");
    }

    #[tokio::test]
    async fn test_fetch_sets_fetched_count() {
        let pages = StubPages::default().with("https://rally.test/feed", RSS);
        let fetcher = FeedFetcher::new(&pages, Duration::from_secs(5));

        let (entries, report) = fetcher.fetch("https://rally.test/feed").await;
        assert_eq!(entries.len(), 2);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.source, "https://rally.test/feed");
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_recorded() {
        let pages = StubPages::default();
        let fetcher = FeedFetcher::new(&pages, Duration::from_secs(5));

        let (entries, report) = fetcher.fetch("https://down.test/feed").await;
        assert!(entries.is_empty());
        assert_eq!(report.fetched, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("feed fetch failed"));
    }
}
