//! Publish client seam and the platform adapter.

use async_trait::async_trait;

use crate::model::{Credentials, Post};

pub mod graph;

pub use graph::GraphPublisher;

/// Everything the platform needs for a single publish attempt.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub caption: &'a str,
    pub video_url: &'a str,
    pub credentials: &'a Credentials,
}

impl<'a> PublishRequest<'a> {
    pub fn for_post(post: &'a Post, credentials: &'a Credentials) -> Self {
        Self {
            caption: &post.caption,
            video_url: &post.video_url,
            credentials,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published {
        external_id: String,
    },
    Failed {
        reason: String,
    },
}

impl PublishOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        PublishOutcome::Failed {
            reason: reason.into(),
        }
    }
}

/// A single publish attempt against the platform.
///
/// Implementations report every failure (network, auth, rejection) as
/// [`PublishOutcome::Failed`] and never retry internally.
#[async_trait]
pub trait PublishClient: Send + Sync {
    async fn publish(&self, request: PublishRequest<'_>) -> PublishOutcome;
}
