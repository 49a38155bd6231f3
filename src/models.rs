//! Data models shared by the fetchers, the orchestrator and the report writer.
//!
//! This module defines the core data structures used throughout the application:
//! - [`SourceDescriptor`]: One configured source and how to read it
//! - [`Entry`]: A normalized news item produced by either fetcher
//! - [`SourceReport`]: Counters and errors for one source in one run
//! - [`RunReport`]: The audit record written once per run

use chrono::Local;
use serde::{Deserialize, Serialize};

/// How a source is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// RSS 2.0, RSS 1.0 (RDF) or Atom document.
    Feed,
    /// An HTML page listing article links that must be scraped one by one.
    HtmlListing,
}

/// One configured source, in the order it appears in the sources file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// The URL to fetch.
    pub locator: String,
    /// Which fetcher handles the locator.
    pub kind: SourceKind,
}

impl SourceDescriptor {
    pub fn feed(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            kind: SourceKind::Feed,
        }
    }

    pub fn html_listing(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            kind: SourceKind::HtmlListing,
        }
    }
}

/// A normalized news item.
///
/// Entries are built by a fetcher and only read afterwards. The
/// `identity_key` decides whether the entry was already sent; an entry with
/// an empty key can still be delivered but is never recorded in the sent log.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    /// Feed-native id or guid, else the canonical article link.
    pub identity_key: String,
    /// Headline, possibly empty.
    pub title: String,
    /// Absolute URL of the article.
    pub link: String,
    /// Publish timestamp exactly as the upstream wrote it, possibly empty.
    pub published: String,
    /// Feed summary, or the cleaned article body for scraped sources.
    pub body_html: String,
}

impl Entry {
    /// Whether this entry can be tracked in the sent log.
    pub fn is_trackable(&self) -> bool {
        !self.identity_key.is_empty()
    }
}

/// Outcome of one source within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    /// The source locator.
    pub source: String,
    /// Entries returned by the fetcher.
    pub fetched: usize,
    /// Entries not present in the sent log.
    pub new_found: usize,
    /// Entries confirmed delivered downstream.
    pub sent: usize,
    /// `fetched - new_found`.
    pub skipped: usize,
    /// Fetch, extraction, delivery and persistence errors, in occurrence order.
    pub errors: Vec<String>,
}

impl SourceReport {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn status(&self) -> SourceStatus {
        if self.errors.is_empty() {
            SourceStatus::Completed
        } else {
            SourceStatus::CompletedWithErrors
        }
    }
}

/// Terminal state of a processed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Completed,
    CompletedWithErrors,
}

/// The audit record of one full pass over all configured sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Local start time, `YYYY-MM-DDTHH:MM:SS`.
    pub started_at: String,
    /// Local end time; `None` until [`RunReport::finish`] is called.
    pub finished_at: Option<String>,
    pub total_sources: usize,
    pub total_new_found: usize,
    pub total_sent: usize,
    pub total_errors: usize,
    /// Per-source reports in processing order.
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    /// Start a report stamped with the current local time.
    pub fn start(total_sources: usize) -> Self {
        Self {
            started_at: local_timestamp(),
            finished_at: None,
            total_sources,
            total_new_found: 0,
            total_sent: 0,
            total_errors: 0,
            sources: Vec::new(),
        }
    }

    /// Sum the per-source counters and stamp the end time.
    pub fn finish(&mut self) {
        self.total_new_found = self.sources.iter().map(|s| s.new_found).sum();
        self.total_sent = self.sources.iter().map(|s| s.sent).sum();
        self.total_errors = self.sources.iter().map(|s| s.errors.len()).sum();
        self.finished_at = Some(local_timestamp());
    }
}

fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_report_status() {
        let mut report = SourceReport::new("https://example.com/feed");
        assert_eq!(report.status(), SourceStatus::Completed);

        report.error("listing fetch failed: timeout");
        assert_eq!(report.status(), SourceStatus::CompletedWithErrors);
    }

    #[test]
    fn test_run_report_aggregates() {
        let mut run = RunReport::start(2);
        run.sources.push(SourceReport {
            source: "a".to_string(),
            fetched: 5,
            new_found: 3,
            sent: 2,
            skipped: 2,
            errors: vec!["delivery failed".to_string()],
        });
        run.sources.push(SourceReport {
            source: "b".to_string(),
            fetched: 1,
            new_found: 1,
            sent: 1,
            skipped: 0,
            errors: vec![],
        });
        run.finish();

        assert_eq!(run.total_sources, 2);
        assert_eq!(run.total_new_found, 4);
        assert_eq!(run.total_sent, 3);
        assert_eq!(run.total_errors, 1);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_run_report_serialization() {
        let mut run = RunReport::start(0);
        run.finish();

        let json = serde_json::to_string(&run).unwrap();
        assert!(json.contains("\"started_at\""));
        assert!(json.contains("\"total_sent\":0"));
        assert!(json.contains("\"sources\":[]"));
    }

    #[test]
    fn test_entry_trackable() {
        let entry = Entry {
            identity_key: "https://example.com/a".to_string(),
            ..Entry::default()
        };
        assert!(entry.is_trackable());
        assert!(!Entry::default().is_trackable());
    }
}
