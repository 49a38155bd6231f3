//! Image collaborators: a chat-based topic selector and an Unsplash photo
//! search.
//!
//! Both are best effort. Any failure is logged and turns into `None`, and the
//! post is then published as a plain text message.

use crate::api::{ChatEndpoint, render_prompt};
use crate::delivery::{LookupImage, SelectTopic};
use crate::settings::{ImageSettings, RewriterSettings};
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Asks the chat endpoint for a one-word photo search topic.
#[derive(Debug)]
pub struct ChatTopicSelector {
    endpoint: ChatEndpoint,
    prompt: String,
}

impl ChatTopicSelector {
    pub fn new(
        client: Client,
        rewriter: &RewriterSettings,
        images: &ImageSettings,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint: ChatEndpoint::new(client, rewriter, api_key, timeout),
            prompt: images.topic_prompt.clone(),
        }
    }
}

impl SelectTopic for ChatTopicSelector {
    #[instrument(level = "info", skip_all)]
    async fn select_topic(&self, title: &str, body: &str) -> Option<String> {
        let reply = match self.endpoint.complete(&render_prompt(&self.prompt, title, body)).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Topic selection failed; posting without image");
                return None;
            }
        };
        let topic = single_word_topic(&reply);
        if topic.is_none() {
            debug!(%reply, "Topic reply is not a single word");
        }
        topic
    }
}

/// Accept a reply only when it is one lowercase ASCII word.
///
/// Surrounding quotes and a trailing period are tolerated.
pub fn single_word_topic(reply: &str) -> Option<String> {
    let word = reply
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
        .to_lowercase();
    let valid = !word.is_empty()
        && word.is_ascii()
        && word.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    valid.then_some(word)
}

#[derive(Debug, Deserialize)]
struct SearchReply {
    #[serde(default)]
    results: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    urls: PhotoUrls,
}

#[derive(Debug, Deserialize)]
struct PhotoUrls {
    regular: String,
}

/// Unsplash photo search returning the first landscape result.
pub struct UnsplashImages {
    client: Client,
    base_url: String,
    access_key: String,
    timeout: Duration,
}

impl UnsplashImages {
    pub fn new(
        client: Client,
        settings: &ImageSettings,
        access_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: settings.unsplash_base_url.trim_end_matches('/').to_string(),
            access_key: access_key.into(),
            timeout,
        }
    }

    async fn search(&self, topic: &str) -> Result<Option<String>, Box<dyn Error>> {
        let reply: SearchReply = self
            .client
            .get(format!("{}/search/photos", self.base_url))
            .header(AUTHORIZATION, format!("Client-ID {}", self.access_key))
            .query(&[("query", topic), ("orientation", "landscape"), ("per_page", "1")])
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(reply.results.into_iter().next().map(|p| p.urls.regular))
    }
}

impl fmt::Debug for UnsplashImages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsplashImages")
            .field("base_url", &self.base_url)
            .field("access_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LookupImage for UnsplashImages {
    #[instrument(level = "info", skip_all, fields(%topic))]
    async fn lookup_image(&self, topic: &str) -> Option<String> {
        match self.search(topic).await {
            Ok(Some(url)) => Some(url),
            Ok(None) => {
                debug!("No photo for topic");
                None
            }
            Err(e) => {
                warn!(error = %e, "Photo search failed; posting without image");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{local_client, serve_once};

    fn selector(base_url: String) -> ChatTopicSelector {
        let rewriter = RewriterSettings {
            base_url,
            ..RewriterSettings::default()
        };
        let images = ImageSettings {
            topic_prompt: "Tag for {title}: {body}".to_string(),
            ..ImageSettings::default()
        };
        ChatTopicSelector::new(local_client(), &rewriter, &images, "sk-topic", Duration::from_secs(5))
    }

    fn unsplash(base_url: String) -> UnsplashImages {
        let settings = ImageSettings {
            unsplash_base_url: base_url,
            ..ImageSettings::default()
        };
        UnsplashImages::new(local_client(), &settings, "unsplash-secret", Duration::from_secs(5))
    }

    #[test]
    fn test_single_word_topic() {
        assert_eq!(single_word_topic(" Drift.\n").as_deref(), Some("drift"));
        assert_eq!(single_word_topic("\"wrc\"").as_deref(), Some("wrc"));
        assert_eq!(single_word_topic("rally car"), None);
        assert_eq!(single_word_topic("ралли"), None);
        assert_eq!(single_word_topic("  "), None);
    }

    #[tokio::test]
    async fn test_topic_selector_sends_prompt_and_accepts_one_word() {
        let (base_url, server) =
            serve_once(200, r#"{"choices":[{"message":{"content":"Podium\n"}}]}"#).await;

        let topic = selector(base_url).select_topic("Win in Kenya", "<p>Safari stage</p>").await;
        assert_eq!(topic.as_deref(), Some("podium"));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /chat/completions"));
        assert!(request.to_lowercase().contains("authorization: bearer sk-topic"));
        assert!(request.contains("Tag for Win in Kenya: Safari stage"));
    }

    #[tokio::test]
    async fn test_topic_selector_rejects_sentence() {
        let (base_url, server) = serve_once(
            200,
            r#"{"choices":[{"message":{"content":"The best tag is rally"}}]}"#,
        )
        .await;

        assert_eq!(selector(base_url).select_topic("t", "b").await, None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_topic_selector_error_is_none() {
        let (base_url, server) = serve_once(500, r#"{"error":"down"}"#).await;

        assert_eq!(selector(base_url).select_topic("t", "b").await, None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsplash_returns_first_regular_url() {
        let (base_url, server) = serve_once(
            200,
            r#"{"total":2,"results":[{"urls":{"regular":"https://images.test/a.jpg","small":"x"}},{"urls":{"regular":"https://images.test/b.jpg"}}]}"#,
        )
        .await;

        let url = unsplash(base_url).lookup_image("drift").await;
        assert_eq!(url.as_deref(), Some("https://images.test/a.jpg"));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /search/photos?"));
        assert!(request.contains("query=drift"));
        assert!(request.contains("orientation=landscape"));
        assert!(request.contains("per_page=1"));
        assert!(request.to_lowercase().contains("authorization: client-id unsplash-secret"));
    }

    #[tokio::test]
    async fn test_unsplash_no_results_is_none() {
        let (base_url, server) = serve_once(200, r#"{"total":0,"results":[]}"#).await;

        assert_eq!(unsplash(base_url).lookup_image("burnout").await, None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsplash_http_error_is_none() {
        let (base_url, server) = serve_once(401, r#"{"errors":["OAuth error"]}"#).await;

        assert_eq!(unsplash(base_url).lookup_image("rally").await, None);
        server.await.unwrap();
    }

    #[test]
    fn test_debug_hides_access_key() {
        let images = unsplash("http://127.0.0.1:1".to_string());
        assert!(!format!("{images:?}").contains("unsplash-secret"));
    }
}
