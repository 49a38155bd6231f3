//! # feed_courier
//!
//! Reads a list of news sources, finds entries that were not delivered yet,
//! rewrites them and posts them to a Telegram channel. A JSON sent log makes
//! repeated runs idempotent.
//!
//! ## Features
//!
//! - RSS 2.0, RSS 1.0 (RDF) and Atom feeds
//! - HTML listing pages (`HTML:` prefix), scraped article by article
//! - Optional rewriting through an OpenAI-compatible chat endpoint
//! - Optional photos: a one-word topic from the chat endpoint, searched on Unsplash
//! - A JSON report per run for auditing
//!
//! ## Usage
//!
//! ```sh
//! TG_TOKEN=... TG_CHAT_ID=@channel feed_courier -s rss_sources.txt
//! ```
//!
//! ## Architecture
//!
//! 1. **Sources**: parse the sources file
//! 2. **Fetching**: one fetcher per source kind, all sequential
//! 3. **Delivery**: rewrite, then publish each entry not in the sent log
//! 4. **Output**: persist the sent log after each source, write the run report

use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::time::Duration as StdDuration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod delivery;
mod images;
mod models;
mod outputs;
mod pipeline;
mod publish;
mod scrapers;
mod sent_log;
mod settings;
mod sources;
#[cfg(test)]
mod testing;
mod utils;

use api::{ChatRewriter, RetryRewrite};
use cli::Cli;
use delivery::Delivery;
use images::{ChatTopicSelector, UnsplashImages};
use outputs::json;
use pipeline::{Pipeline, log_summary};
use publish::TelegramPublisher;
use scrapers::HttpClient;
use sent_log::SentLogStore;
use settings::Settings;
use sources::load_sources;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "feed_courier starting up");

    let args = Cli::parse();
    debug!(
        sources = %args.sources,
        sent_log = %args.sent_log,
        report_dir = %args.report_dir,
        timeout_secs = args.timeout_secs,
        rewriter = args.api_key.is_some(),
        images = args.unsplash_key.is_some(),
        "Parsed CLI arguments"
    );

    let settings = Settings::load(args.config.as_deref()).await?;
    let timeout = StdDuration::from_secs(args.timeout_secs);

    // Early check: the report must be writable before anything is sent
    if let Err(e) = ensure_writable_dir(&args.report_dir).await {
        error!(
            path = %args.report_dir,
            error = %e,
            "Report directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let sources = load_sources(&args.sources).await.unwrap_or_else(|e| {
        error!(path = %args.sources, error = %e, "Cannot read sources file; running with no sources");
        Vec::new()
    });

    let http = HttpClient::new()?;
    let api_client = reqwest::Client::builder()
        .user_agent(scrapers::USER_AGENT)
        .build()?;

    let api_key = args.api_key.as_deref().filter(|k| !k.trim().is_empty());
    let unsplash_key = args.unsplash_key.as_deref().filter(|k| !k.trim().is_empty());

    let (topics, images) = match (unsplash_key, api_key) {
        (Some(access_key), Some(key)) => {
            info!("Image lookup enabled");
            (
                Some(ChatTopicSelector::new(
                    api_client.clone(),
                    &settings.rewriter,
                    &settings.images,
                    key,
                    timeout,
                )),
                Some(UnsplashImages::new(api_client.clone(), &settings.images, access_key, timeout)),
            )
        }
        (Some(_), None) => {
            warn!("Unsplash key given but no rewriter API key to pick topics; posting without images");
            (None, None)
        }
        (None, _) => (None, None),
    };

    let rewriter = match api_key {
        Some(key) => {
            info!(model = %settings.rewriter.model, "Rewriting enabled");
            let max_retries = settings.rewriter.max_retries;
            let chat = ChatRewriter::new(api_client.clone(), settings.rewriter, key, timeout);
            Some(RetryRewrite::new(chat, max_retries, StdDuration::from_secs(1)))
        }
        None => {
            info!("No rewriter API key; posting original titles with plain-text bodies");
            None
        }
    };

    let delivery = Delivery {
        rewriter,
        topics,
        images,
        publisher: TelegramPublisher::new(
            api_client,
            args.telegram_token.as_str(),
            args.telegram_chat_id.as_str(),
            timeout,
        )
        .with_api_base(&args.telegram_api_base),
    };

    let store = SentLogStore::new(&args.sent_log);
    let pipeline = Pipeline::new(&http, &delivery, &store, timeout);
    let report = pipeline.run(&sources).await;
    log_summary(&report);

    if let Err(e) = json::write_run_report(&report, Path::new(&args.report_dir)).await {
        error!(error = %e, "Failed to write run report");
    }

    let elapsed = start_time.elapsed();
    info!(
        elapsed_secs = elapsed.as_secs_f64(),
        sent = report.total_sent,
        errors = report.total_errors,
        "feed_courier finished"
    );

    Ok(())
}
