//! Source fetchers that turn a locator into normalized entries.
//!
//! Two fetchers share one contract, [`SourceFetcher`]:
//!
//! | Source kind | Module | Method |
//! |-------------|--------|--------|
//! | Feed | [`feed`] | RSS 2.0 / RSS 1.0 / Atom parsing |
//! | HTML listing | [`html`] | Listing scrape, then one fetch per article |
//!
//! # Common Patterns
//!
//! Every fetcher:
//! - Goes through a [`FetchPage`] implementation, so tests can serve canned pages
//! - Never fails: network and parse problems become strings in the [`SourceReport`]
//! - Sets `SourceReport::fetched` to the number of entries it returns
//!
//! Fetching is strictly sequential; articles of one listing are requested one
//! after the other.

pub mod feed;
pub mod html;

use crate::models::{Entry, SourceReport};
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use std::error::Error;
use std::time::Duration;
use tracing::{debug, instrument};

/// User-Agent sent with every page request.
pub const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; feed_courier/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

const ACCEPT_PAGES: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Entries produced by a fetcher together with the report describing the fetch.
pub type Fetched = (Vec<Entry>, SourceReport);

/// Retrieve a page body as text.
///
/// Implementors must honour `timeout` and treat non-success HTTP statuses as
/// errors.
pub trait FetchPage {
    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, Box<dyn Error>>;
}

/// Common contract of the feed and HTML listing fetchers.
pub trait SourceFetcher {
    /// Fetch `locator` and normalize what was found. Never fails; problems are
    /// recorded in the returned report.
    async fn fetch(&self, locator: &str) -> Fetched;
}

/// [`FetchPage`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Build the client with the crate's User-Agent and default `Accept` header.
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_PAGES));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }
}

impl FetchPage for HttpClient {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, Box<dyn Error>> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        debug!(bytes = body.len(), "Fetched page");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_is_descriptive() {
        assert!(USER_AGENT.contains("feed_courier/"));
        assert!(USER_AGENT.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn test_http_client_builds() {
        assert!(HttpClient::new().is_ok());
    }
}
