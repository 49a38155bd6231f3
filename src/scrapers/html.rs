//! Scraper for sources that publish an HTML listing page instead of a feed.
//!
//! Scraping happens in two phases:
//!
//! 1. **Indexing**: fetch the listing and collect article anchors
//!    (`h2.entry-title a`, `h3.entry-title a`, falling back to `article a`).
//! 2. **Fetching**: fetch each article in turn and extract its main content.
//!
//! The markup conventions targeted are the common WordPress ones
//! (`.entry-content`, `time.entry-date`, `.sharedaddy`, ...).
//!
//! Content cleanup runs the container's markup through a `lol_html`
//! rewriter: noise elements are removed and every resource reference
//! (`src`, `href`, `poster`, `data-src`, `srcset`, `data-srcset`) is made
//! absolute.
//!
//! A failed article never aborts the listing: it is recorded on the report and
//! skipped.

use super::{FetchPage, Fetched, SourceFetcher};
use crate::models::{Entry, SourceReport};
use crate::utils::{collapse_whitespace, html_to_text};
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use lol_html::{HtmlRewriter, Settings, element};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

static TITLE_LINKS: Lazy<Selector> = Lazy::new(|| selector("h2.entry-title a, h3.entry-title a"));
static ARTICLE_LINKS: Lazy<Selector> = Lazy::new(|| selector("article a"));
static ARTICLE: Lazy<Selector> = Lazy::new(|| selector("article"));

/// Main content containers, most specific first.
static CONTENT: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "article .entry-content",
        ".entry-content",
        "article .post-content",
        ".post-content",
        "article .content",
        "main article",
    ]
    .into_iter()
    .map(selector)
    .collect()
});

/// Elements that count as content even without text.
static MEDIA: Lazy<Selector> =
    Lazy::new(|| selector("img, picture, video, audio, iframe, embed, object"));

/// Sub-trees dropped from the extracted content.
const NOISE: &[&str] = &[
    "script",
    "style",
    "noscript",
    ".sharedaddy",
    ".share",
    ".social-share",
    ".post-meta",
    ".post-tags",
    ".tags",
];

/// Date-bearing elements, in priority order.
static DATES: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "time.entry-date",
        "time.published",
        "meta[property='article:published_time']",
        "time[datetime]",
    ]
    .into_iter()
    .map(selector)
    .collect()
});

/// Attributes holding a single URL.
const URL_ATTRS: &[&str] = &["src", "href", "poster", "data-src"];

/// Attributes holding a comma-separated list of `url [descriptor]` candidates.
const SRCSET_ATTRS: &[&str] = &["srcset", "data-srcset"];

/// An article link found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingAnchor {
    /// Absolute article URL.
    pub url: Url,
    /// Visible link text, whitespace collapsed.
    pub title: String,
}

/// What was extracted from one article page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticlePage {
    /// Cleaned main content with absolute links.
    pub body_html: String,
    /// Publish timestamp as written on the page, possibly empty.
    pub published: String,
}

/// Collect article anchors from a listing page.
///
/// Anchors without an `href` or without visible text are ignored. Relative
/// links are resolved against `base`; a URL linked more than once is kept
/// once.
pub fn find_article_anchors(html: &str, base: &Url) -> Vec<ListingAnchor> {
    let document = Html::parse_document(html);

    let mut candidates: Vec<ElementRef<'_>> = document.select(&TITLE_LINKS).collect();
    if candidates.is_empty() {
        debug!("No entry-title links; falling back to article links");
        candidates = document.select(&ARTICLE_LINKS).collect();
    }

    candidates
        .into_iter()
        .filter_map(|a| {
            let href = a.value().attr("href").map(str::trim).filter(|h| !h.is_empty())?;
            let title = collapse_whitespace(&a.text().collect::<Vec<_>>().join(" "));
            if title.is_empty() {
                return None;
            }
            let url = base.join(href).ok()?;
            Some(ListingAnchor { url, title })
        })
        .unique_by(|anchor| anchor.url.clone())
        .collect()
}

/// Extract the main content and publish date of an article page.
///
/// Containers are tried in priority order and the first one that still has
/// text or media after cleaning wins. Otherwise the cleaned `<article>` text
/// is used. Returns `None` when nothing is left.
pub fn extract_article(html: &str, page_url: &Url) -> Option<ArticlePage> {
    let document = Html::parse_document(html);
    let published = published_of(&document);

    let body_html = CONTENT
        .iter()
        .filter_map(|sel| document.select(sel).next())
        .filter_map(|container| clean_container(container, page_url))
        .find(|cleaned| has_content(cleaned))
        .or_else(|| {
            debug!("No content container with a body; using article text");
            let article = document.select(&ARTICLE).next()?;
            let text = html_to_text(&clean_container(article, page_url)?);
            (!text.is_empty()).then_some(text)
        })?;

    Some(ArticlePage {
        body_html,
        published,
    })
}

fn has_content(markup: &str) -> bool {
    let fragment = Html::parse_fragment(markup);
    fragment.root_element().text().any(|t| !t.trim().is_empty())
        || fragment.select(&MEDIA).next().is_some()
}

fn published_of(document: &Html) -> String {
    DATES
        .iter()
        .filter_map(|sel| document.select(sel).next())
        .map(|el| {
            let value = el.value();
            value
                .attr("datetime")
                .or_else(|| value.attr("content"))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| collapse_whitespace(&el.text().collect::<String>()))
        })
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

/// Serialize `container` without noise sub-trees, with absolute URLs.
fn clean_container(container: ElementRef<'_>, base: &Url) -> Option<String> {
    let mut handlers = vec![element!("*", |el| {
        for &attr in URL_ATTRS {
            if let Some(value) = el.get_attribute(attr) {
                let absolute = absolutize(base, &value);
                if absolute != value {
                    el.set_attribute(attr, &absolute)?;
                }
            }
        }
        for &attr in SRCSET_ATTRS {
            if let Some(value) = el.get_attribute(attr) {
                let absolute = absolutize_srcset(base, &value);
                if absolute != value {
                    el.set_attribute(attr, &absolute)?;
                }
            }
        }
        Ok(())
    })];
    handlers.extend(NOISE.iter().copied().map(|css| {
        element!(css, |el| {
            el.remove();
            Ok(())
        })
    }));

    let mut out = Vec::new();
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: handlers,
            ..Settings::default()
        },
        |chunk: &[u8]| out.extend_from_slice(chunk),
    );
    let rewritten = rewriter
        .write(container.html().as_bytes())
        .and_then(|()| rewriter.end());
    if let Err(e) = rewritten {
        warn!(error = %e, "Cannot clean article markup");
        return None;
    }

    String::from_utf8(out).ok().map(|html| html.trim().to_string())
}

fn absolutize(base: &Url, value: &str) -> String {
    match base.join(value.trim()) {
        Ok(url) => url.to_string(),
        Err(_) => value.to_string(),
    }
}

/// Absolutize each candidate of a `srcset` list, keeping its descriptor.
fn absolutize_srcset(base: &Url, value: &str) -> String {
    // commas are part of data URIs
    if value.trim_start().starts_with("data:") {
        return value.to_string();
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(|candidate| match candidate.split_once(char::is_whitespace) {
            Some((url, descriptor)) => format!("{} {}", absolutize(base, url), descriptor.trim()),
            None => absolutize(base, candidate),
        })
        .join(", ")
}

/// Scrapes HTML listing sources.
#[derive(Debug)]
pub struct HtmlListingFetcher<'a, C> {
    client: &'a C,
    timeout: Duration,
}

impl<'a, C: FetchPage> HtmlListingFetcher<'a, C> {
    pub fn new(client: &'a C, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Fetch one article; the error string is what ends up on the report.
    #[instrument(level = "info", skip_all, fields(url = %anchor.url))]
    async fn fetch_article(&self, anchor: ListingAnchor) -> Result<Entry, String> {
        let page = match self.client.get_text(anchor.url.as_str(), self.timeout).await {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "Article fetch failed");
                return Err(format!("article fetch failed: {e} | {}", anchor.url));
            }
        };

        let Some(article) = extract_article(&page, &anchor.url) else {
            warn!("Article page has no recognizable body");
            return Err(format!("no article body | {}", anchor.url));
        };

        debug!(bytes = article.body_html.len(), "Extracted article");
        let link = anchor.url.to_string();
        Ok(Entry {
            identity_key: link.clone(),
            title: anchor.title,
            link,
            published: article.published,
            body_html: article.body_html,
        })
    }
}

impl<C: FetchPage> SourceFetcher for HtmlListingFetcher<'_, C> {
    #[instrument(level = "info", skip_all, fields(%locator))]
    async fn fetch(&self, locator: &str) -> Fetched {
        let mut report = SourceReport::new(locator);

        let base = match Url::parse(locator) {
            Ok(base) => base,
            Err(e) => {
                error!(error = %e, "Listing locator is not a URL");
                report.error(format!("invalid listing URL: {e}"));
                return (Vec::new(), report);
            }
        };

        let listing = match self.client.get_text(locator, self.timeout).await {
            Ok(listing) => listing,
            Err(e) => {
                error!(error = %e, "Listing fetch failed");
                report.error(format!("listing fetch failed: {e}"));
                return (Vec::new(), report);
            }
        };

        let anchors = find_article_anchors(&listing, &base);
        info!(count = anchors.len(), "Indexed listing anchors");

        let results: Vec<Result<Entry, String>> = stream::iter(anchors)
            .then(|anchor| self.fetch_article(anchor))
            .collect()
            .await;

        let mut entries = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(entry) => entries.push(entry),
                Err(message) => report.error(message),
            }
        }

        report.fetched = entries.len();
        info!(
            count = entries.len(),
            failed = report.errors.len(),
            "Fetched listing articles"
        );
        (entries, report)
    }
}
