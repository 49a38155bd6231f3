//! Run orchestration: fetch every source, deliver what is new, remember it.
//!
//! Sources are processed one at a time in file order. For each source:
//!
//! 1. The matching fetcher produces entries and a [`SourceReport`]
//! 2. Entries whose identity key is already in the sent log are skipped
//! 3. Each new entry is handed to the [`Deliver`] collaborator
//! 4. Confirmed deliveries are added to the log, which is then persisted
//!
//! The in-memory log is updated after every source, so an entry syndicated by
//! two sources is delivered only once per run. Nothing a single source or
//! entry does can stop the run.

use crate::delivery::Deliver;
use crate::models::{Entry, RunReport, SourceDescriptor, SourceKind, SourceReport, SourceStatus};
use crate::scrapers::feed::FeedFetcher;
use crate::scrapers::html::HtmlListingFetcher;
use crate::scrapers::{FetchPage, SourceFetcher};
use crate::sent_log::{SentLog, SentLogStore};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug)]
pub struct Pipeline<'a, C, D> {
    client: &'a C,
    delivery: &'a D,
    store: &'a SentLogStore,
    timeout: Duration,
}

impl<'a, C, D> Pipeline<'a, C, D>
where
    C: FetchPage,
    D: Deliver,
{
    pub fn new(client: &'a C, delivery: &'a D, store: &'a SentLogStore, timeout: Duration) -> Self {
        Self {
            client,
            delivery,
            store,
            timeout,
        }
    }

    /// Process every source and return the finished run report.
    #[instrument(level = "info", skip_all, fields(sources = sources.len()))]
    pub async fn run(&self, sources: &[SourceDescriptor]) -> RunReport {
        let mut report = RunReport::start(sources.len());
        if sources.is_empty() {
            warn!("No sources configured; nothing to do");
        }

        let mut log = self.store.load().await;
        if log.is_empty() {
            info!("Sent log is empty; every entry counts as new");
        }
        for source in sources {
            let source_report = self.process_source(source, &mut log).await;
            report.sources.push(source_report);
        }

        report.finish();
        report
    }

    #[instrument(level = "info", skip_all, fields(locator = %source.locator, kind = ?source.kind))]
    async fn process_source(&self, source: &SourceDescriptor, log: &mut SentLog) -> SourceReport {
        let (entries, mut report) = match source.kind {
            SourceKind::Feed => {
                FeedFetcher::new(self.client, self.timeout)
                    .fetch(&source.locator)
                    .await
            }
            SourceKind::HtmlListing => {
                HtmlListingFetcher::new(self.client, self.timeout)
                    .fetch(&source.locator)
                    .await
            }
        };

        let fresh = partition_new(&entries, log);
        report.new_found = fresh.len();
        report.skipped = report.fetched.saturating_sub(report.new_found);
        info!(
            fetched = report.fetched,
            new = report.new_found,
            skipped = report.skipped,
            "Partitioned entries"
        );

        let mut delivered: Vec<&Entry> = Vec::with_capacity(fresh.len());
        for entry in fresh {
            match self.delivery.deliver(entry).await {
                Ok(()) => delivered.push(entry),
                Err(e) => {
                    warn!(link = %entry.link, error = %e, "Delivery failed; will retry next run");
                    report.error(format!("delivery failed: {}: {e}", entry.link));
                }
            }
        }
        report.sent = delivered.len();

        if !delivered.is_empty() {
            log.mark_sent(delivered.iter().copied());
            if let Err(e) = self.store.persist(log).await {
                error!(
                    path = %self.store.path().display(),
                    error = %e,
                    "Failed to write sent log; delivered entries may be sent again"
                );
                report.error(format!("sent log write failed: {e}"));
            }
        }

        report
    }
}

/// Entries not yet in `log`, in fetch order.
///
/// A key repeated within `entries` is new only at its first occurrence.
/// Entries without a key cannot be deduplicated and are always new, so they
/// are posted again on every run for as long as the source lists them.
pub fn partition_new<'e>(entries: &'e [Entry], log: &SentLog) -> Vec<&'e Entry> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut fresh = Vec::new();
    for entry in entries {
        if !entry.is_trackable() {
            warn!(
                link = %entry.link,
                title = %entry.title,
                "Entry has no identity key; it will be posted again on every run"
            );
            fresh.push(entry);
            continue;
        }
        if let Some(sent_at) = log.last_sent(&entry.identity_key) {
            debug!(key = %entry.identity_key, sent_at, "Already sent");
            continue;
        }
        if seen.insert(entry.identity_key.as_str()) {
            fresh.push(entry);
        }
    }
    fresh
}

/// Log one line per source plus run totals.
pub fn log_summary(report: &RunReport) {
    for source in &report.sources {
        match source.status() {
            SourceStatus::Completed => info!(
                source = %source.source,
                fetched = source.fetched,
                new = source.new_found,
                sent = source.sent,
                skipped = source.skipped,
                "Source completed"
            ),
            SourceStatus::CompletedWithErrors => {
                warn!(
                    source = %source.source,
                    fetched = source.fetched,
                    new = source.new_found,
                    sent = source.sent,
                    skipped = source.skipped,
                    errors = source.errors.len(),
                    "Source completed with errors"
                );
                for message in &source.errors {
                    warn!(source = %source.source, error = %message, "Source error");
                }
            }
        }
    }
    info!(
        sources = report.total_sources,
        new = report.total_new_found,
        sent = report.total_sent,
        errors = report.total_errors,
        "Run finished"
    );
}
