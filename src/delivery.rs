//! Downstream collaborators and the chain that delivers one entry.
//!
//! The pipeline only knows [`Deliver`]: hand over an entry, learn whether it
//! reached the channel. [`Delivery`] implements it by chaining four
//! collaborators:
//!
//! 1. [`Rewrite`]: turn the original title and body into the post text
//! 2. [`SelectTopic`]: pick an image topic for the entry (optional)
//! 3. [`LookupImage`]: find an image URL for that topic (optional)
//! 4. [`Publish`]: send the post
//!
//! A missing topic or image is not an error; the post simply goes out
//! without a picture.

use crate::models::Entry;
use std::error::Error;
use tracing::{debug, info, instrument};

/// Post text produced by a [`Rewrite`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub title: String,
    pub body: String,
}

/// A message ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub title: String,
    pub body: String,
    pub link: String,
    pub image_url: Option<String>,
}

/// Result reported by a [`Publish`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub ok: bool,
    pub error: Option<String>,
    pub message_id: Option<i64>,
}

impl PublishOutcome {
    pub fn sent(message_id: Option<i64>) -> Self {
        Self {
            ok: true,
            error: None,
            message_id,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            message_id: None,
        }
    }
}

/// Rewrites an entry's title and body into post text.
pub trait Rewrite {
    async fn rewrite(&self, title: &str, body_html: &str) -> Result<Rewritten, Box<dyn Error>>;
}

/// Picks a search topic for an illustrative image.
pub trait SelectTopic {
    async fn select_topic(&self, title: &str, body: &str) -> Option<String>;
}

/// Finds an image URL for a topic.
pub trait LookupImage {
    async fn lookup_image(&self, topic: &str) -> Option<String>;
}

/// Sends a post to the channel.
pub trait Publish {
    async fn publish(&self, post: &Post) -> PublishOutcome;
}

/// Delivers one entry downstream; `Ok` means the channel confirmed it.
pub trait Deliver {
    async fn deliver(&self, entry: &Entry) -> Result<(), Box<dyn Error>>;
}

/// `None` selects no topic, so the post goes out without a picture.
impl<T> SelectTopic for Option<T>
where
    T: SelectTopic,
{
    async fn select_topic(&self, title: &str, body: &str) -> Option<String> {
        match self {
            Some(inner) => inner.select_topic(title, body).await,
            None => None,
        }
    }
}

impl<L> LookupImage for Option<L>
where
    L: LookupImage,
{
    async fn lookup_image(&self, topic: &str) -> Option<String> {
        match self {
            Some(inner) => inner.lookup_image(topic).await,
            None => None,
        }
    }
}

/// The rewrite → image → publish chain.
#[derive(Debug)]
pub struct Delivery<R, T, I, P> {
    pub rewriter: R,
    pub topics: T,
    pub images: I,
    pub publisher: P,
}

impl<R, T, I, P> Deliver for Delivery<R, T, I, P>
where
    R: Rewrite,
    T: SelectTopic,
    I: LookupImage,
    P: Publish,
{
    #[instrument(level = "info", skip_all, fields(link = %entry.link))]
    async fn deliver(&self, entry: &Entry) -> Result<(), Box<dyn Error>> {
        let rewritten = self
            .rewriter
            .rewrite(&entry.title, &entry.body_html)
            .await
            .map_err(|e| format!("rewrite: {e}"))?;

        let image_url = match self.topics.select_topic(&entry.title, &entry.body_html).await {
            Some(topic) => {
                debug!(%topic, "Selected image topic");
                self.images.lookup_image(&topic).await
            }
            None => None,
        };

        let post = Post {
            title: rewritten.title,
            body: rewritten.body,
            link: entry.link.clone(),
            image_url,
        };

        let outcome = self.publisher.publish(&post).await;
        if outcome.ok {
            info!(message_id = ?outcome.message_id, with_image = post.image_url.is_some(), "Published");
            Ok(())
        } else {
            let detail = outcome.error.unwrap_or_else(|| "unknown error".to_string());
            Err(format!("publish: {detail}").into())
        }
    }
}
