//! Telegram Bot API publisher.
//!
//! Posts are sent with HTML parse mode. Without an image the message goes
//! through `sendMessage`; with one it goes through `sendPhoto` and the text
//! becomes the caption, which Telegram limits to 1024 characters.
//!
//! Publishing is never retried: a request that timed out may still have been
//! delivered, and a retry would post it twice.

use crate::delivery::{Post, Publish, PublishOutcome};
use crate::utils::{truncate_chars, truncate_for_log};
use html_escape::{encode_double_quoted_attribute, encode_text};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, instrument};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Body limits leave room for the title, link and markup.
const MESSAGE_BODY_CHARS: usize = 3500;
const CAPTION_BODY_CHARS: usize = 700;

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct TelegramPublisher {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
    timeout: Duration,
}

impl TelegramPublisher {
    pub fn new(
        client: Client,
        token: impl Into<String>,
        chat_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
            timeout,
        }
    }

    /// Point the publisher at another Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call(&self, method: &str, payload: serde_json::Value) -> PublishOutcome {
        let response = match self
            .client
            .post(self.method_url(method))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            // the URL carries the bot token
            Err(e) => return PublishOutcome::failed(e.without_url().to_string()),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return PublishOutcome::failed(e.without_url().to_string()),
        };
        if status != StatusCode::OK {
            return PublishOutcome::failed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate_for_log(&text, 300)
            ));
        }

        match serde_json::from_str::<ApiReply>(&text) {
            Ok(ApiReply { ok: true, result, .. }) => {
                PublishOutcome::sent(result.map(|m| m.message_id))
            }
            Ok(ApiReply { description, .. }) => PublishOutcome::failed(
                description.unwrap_or_else(|| truncate_for_log(&text, 300)),
            ),
            Err(e) => PublishOutcome::failed(format!("unreadable reply: {e}")),
        }
    }
}

impl fmt::Debug for TelegramPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramPublisher")
            .field("api_base", &self.api_base)
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Publish for TelegramPublisher {
    #[instrument(level = "info", skip_all, fields(link = %post.link))]
    async fn publish(&self, post: &Post) -> PublishOutcome {
        let outcome = match &post.image_url {
            Some(photo) => {
                let payload = json!({
                    "chat_id": self.chat_id,
                    "photo": photo,
                    "caption": format_message(post, CAPTION_BODY_CHARS),
                    "parse_mode": "HTML",
                });
                self.call("sendPhoto", payload).await
            }
            None => {
                let payload = json!({
                    "chat_id": self.chat_id,
                    "text": format_message(post, MESSAGE_BODY_CHARS),
                    "parse_mode": "HTML",
                    "disable_web_page_preview": false,
                });
                self.call("sendMessage", payload).await
            }
        };

        match &outcome.error {
            None => info!(message_id = ?outcome.message_id, "Sent to Telegram"),
            Some(e) => error!(error = %e, "Telegram rejected post"),
        }
        outcome
    }
}

/// Render a post as Telegram HTML, cutting the body to `max_body_chars`.
pub fn format_message(post: &Post, max_body_chars: usize) -> String {
    let body = truncate_chars(post.body.trim(), max_body_chars);
    format!(
        "<b>{}</b>\n\n{}\n\n<a href='{}'>Source</a>",
        encode_text(post.title.trim()),
        encode_text(&body),
        encode_double_quoted_attribute(&post.link).replace('\'', "&#39;"),
    )
}
