//! Command-line interface definitions for feed_courier.
//!
//! Every option can also be supplied through an environment variable, which is
//! how the secrets are normally passed.

use clap::Parser;

/// Deliver new feed and listing entries to a Telegram channel, once each.
///
/// # Examples
///
/// ```sh
/// # Defaults: rss_sources.txt, sent_log.json, run_reports/
/// TG_TOKEN=123:abc TG_CHAT_ID=@rally feed_courier
///
/// # Custom paths and a rewriter config
/// feed_courier -s /etc/courier/sources.txt --sent-log /var/lib/courier/sent.json -c rewriter.yaml
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Sources file, one URL per line; prefix `HTML:` for listing pages
    #[arg(short, long, env = "SOURCES_FILE", default_value = "rss_sources.txt")]
    pub sources: String,

    /// Sent log (JSON) recording delivered entries
    #[arg(long, env = "SENT_LOG", default_value = "sent_log.json")]
    pub sent_log: String,

    /// Directory receiving one JSON report per run
    #[arg(short, long, env = "REPORT_DIR", default_value = "run_reports")]
    pub report_dir: String,

    /// Timeout for every network request, in seconds
    #[arg(short, long, env = "TIMEOUT_SECS", default_value_t = 20)]
    pub timeout_secs: u64,

    /// Optional path to the rewriter settings YAML file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Telegram bot token
    #[arg(long, env = "TG_TOKEN", hide_env_values = true)]
    pub telegram_token: String,

    /// Telegram chat id or @channel name
    #[arg(long, env = "TG_CHAT_ID")]
    pub telegram_chat_id: String,

    /// Bot API server, for self-hosted Telegram Bot API deployments
    #[arg(long, env = "TG_API_BASE", default_value = "https://api.telegram.org")]
    pub telegram_api_base: String,

    /// API key for the rewriting model; without it posts keep the original text
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Unsplash access key; with it posts get a photo picked by topic
    #[arg(long, env = "UNSPLASH_ACCESS_KEY", hide_env_values = true)]
    pub unsplash_key: Option<String>,
}
