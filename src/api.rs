//! Rewrite collaborators: an OpenAI-compatible chat client with exponential
//! backoff, and a pass-through fallback.
//!
//! # Architecture
//!
//! - [`ChatEndpoint`]: one `{base_url}/chat/completions` call per prompt,
//!   shared with the image topic selector
//! - [`ChatRewriter`]: renders the rewrite prompt and splits the reply
//! - [`RetryRewrite`]: decorator that adds retry logic to any [`Rewrite`]
//! - `Option<R>`: `None` rewrites nothing and only strips markup
//!
//! # Retry Strategy
//!
//! - Configurable number of retry attempts
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to each delay

use crate::delivery::{Rewrite, Rewritten};
use crate::settings::RewriterSettings;
use crate::utils::{html_to_text, truncate_for_log};
use rand::{Rng, rng};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::error::Error;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Wrapper that adds exponential backoff retry logic to any [`Rewrite`] implementation.
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryRewrite<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetryRewrite<T>
where
    T: Rewrite,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryRewrite<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryRewrite")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Rewrite for RetryRewrite<T>
where
    T: Rewrite,
{
    #[instrument(level = "info", skip_all)]
    async fn rewrite(&self, title: &str, body_html: &str) -> Result<Rewritten, Box<dyn Error>> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.rewrite(title, body_html).await {
                Ok(rewritten) => return Ok(rewritten),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis(),
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "rewrite() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis(),
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "rewrite() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// `None` is the pass-through rewriter: the title is kept and the body is
/// reduced to plain text.
impl<R> Rewrite for Option<R>
where
    R: Rewrite,
{
    async fn rewrite(&self, title: &str, body_html: &str) -> Result<Rewritten, Box<dyn Error>> {
        match self {
            Some(inner) => inner.rewrite(title, body_html).await,
            None => Ok(Rewritten {
                title: title.trim().to_string(),
                body: html_to_text(body_html),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Connection to an OpenAI-compatible chat completion endpoint.
pub struct ChatEndpoint {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout: StdDuration,
}

impl ChatEndpoint {
    pub fn new(
        client: Client,
        settings: &RewriterSettings,
        api_key: impl Into<String>,
        timeout: StdDuration,
    ) -> Self {
        Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: api_key.into(),
            timeout,
        }
    }

    /// Send `prompt` as a single user message and return the reply text.
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    pub async fn complete(&self, prompt: &str) -> Result<String, Box<dyn Error>> {
        let t0 = Instant::now();
        let request = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response: ChatResponse = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or("empty completion")?;

        debug!(
            elapsed_ms = t0.elapsed().as_millis(),
            reply = %truncate_for_log(&content, 200),
            "Completion received"
        );
        Ok(content)
    }
}

impl fmt::Debug for ChatEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatEndpoint")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Fill the `{title}` and `{body}` placeholders of `template`.
pub fn render_prompt(template: &str, title: &str, body_html: &str) -> String {
    template
        .replace("{title}", title.trim())
        .replace("{body}", &html_to_text(body_html))
}

/// Rewriter backed by a chat completion endpoint.
#[derive(Debug)]
pub struct ChatRewriter {
    endpoint: ChatEndpoint,
    prompt: String,
}

impl ChatRewriter {
    pub fn new(
        client: Client,
        settings: RewriterSettings,
        api_key: impl Into<String>,
        timeout: StdDuration,
    ) -> Self {
        Self {
            endpoint: ChatEndpoint::new(client, &settings, api_key, timeout),
            prompt: settings.prompt,
        }
    }
}

impl Rewrite for ChatRewriter {
    async fn rewrite(&self, title: &str, body_html: &str) -> Result<Rewritten, Box<dyn Error>> {
        let reply = self
            .endpoint
            .complete(&render_prompt(&self.prompt, title, body_html))
            .await?;
        Ok(split_headline(&reply))
    }
}

/// Split a completion into headline and body at the first blank line.
///
/// Markdown emphasis around the headline is dropped since posts are sent as
/// HTML.
pub fn split_headline(text: &str) -> Rewritten {
    let text = text.replace("\r\n", "\n");
    let (headline, body) = text.trim().split_once("\n\n").unwrap_or((text.trim(), ""));
    Rewritten {
        title: headline.trim().trim_matches(|c| c == '*' || c == '#').trim().to_string(),
        body: body.trim().to_string(),
    }
}
