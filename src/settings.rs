//! Optional YAML settings for the rewrite and image collaborators.
//!
//! Every field has a default, so a missing file and an empty file behave the
//! same way. Example:
//!
//! ```yaml
//! rewriter:
//!   base_url: https://openrouter.ai/api/v1
//!   model: deepseek/deepseek-r1-0528-qwen3-8b:free
//!   max_retries: 3
//!   prompt: |
//!     Rewrite "{title}" for a rally channel:
//!     {body}
//! images:
//!   unsplash_base_url: https://api.unsplash.com
//! ```

use serde::Deserialize;
use std::error::Error;
use tokio::fs;
use tracing::{info, instrument};

const DEFAULT_PROMPT: &str = "\
Rewrite the following motorsport news article as a short, informative post \
for a Telegram channel about rally and drifting. Write like an expert \
copywriter, in your own words.

Original headline:
{title}

Article text:
{body}

Respond with:
1. A new short, expressive headline (no link)
2. A blank line, then 3-4 paragraphs of explanatory text, at most 600 characters

Tone: dynamic car magazine, no filler, no emoji.";

const DEFAULT_TOPIC_PROMPT: &str = "\
You are a car magazine editor. Return one English tag (a single word) that \
best describes the topic of this news item, for a photo search on Unsplash. \
For example: rally, drift, wrc, racing, motorsport, offroad, podium, \
servicepark, pitstop, supercar, burnout.

Rules: exactly one lowercase English word, no punctuation, quotes or \
explanations.

Headline:
{title}

Text:
{body}";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rewriter: RewriterSettings,
    pub images: ImageSettings,
}

/// Chat completion endpoint and prompt used by the rewriter.
///
/// `prompt` may contain `{title}` and `{body}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RewriterSettings {
    pub base_url: String,
    pub model: String,
    pub prompt: String,
    pub max_retries: usize,
}

impl Default for RewriterSettings {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "deepseek/deepseek-r1-0528-qwen3-8b:free".to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            max_retries: 5,
        }
    }
}

/// Image topic prompt and photo search endpoint.
///
/// The topic prompt goes to the rewriter's endpoint and model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub topic_prompt: String,
    pub unsplash_base_url: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            topic_prompt: DEFAULT_TOPIC_PROMPT.to_string(),
            unsplash_base_url: "https://api.unsplash.com".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or defaults when no path is given.
    ///
    /// A path that was given but cannot be read or parsed is an error.
    #[instrument(level = "info", skip_all, fields(path = ?path))]
    pub async fn load(path: Option<&str>) -> Result<Self, Box<dyn Error>> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .await
            .map_err(|e| format!("settings file {path}: {e}"))?;
        let settings = Self::parse(&text)?;
        info!(model = %settings.rewriter.model, "Loaded settings");
        Ok(settings)
    }

    fn parse(text: &str) -> Result<Self, Box<dyn Error>> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }
}
