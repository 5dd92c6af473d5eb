use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "PENDING",
            PostStatus::Processing => "PROCESSING",
            PostStatus::Published => "PUBLISHED",
            PostStatus::Failed => "FAILED",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PostStatus::Pending),
            "PROCESSING" => Some(PostStatus::Processing),
            "PUBLISHED" => Some(PostStatus::Published),
            "FAILED" => Some(PostStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled short-form video post as stored by the repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub caption: String,
    pub video_url: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: PostStatus,
    pub failure_reason: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("caption must be non-empty")]
    EmptyCaption,
    #[error("video url must be non-empty")]
    EmptyVideoUrl,
    #[error("video url is not a valid http(s) URL: {0}")]
    InvalidVideoUrl(String),
    #[error("access token must be non-empty")]
    EmptyAccessToken,
    #[error("account id must be non-empty")]
    EmptyAccountId,
}

/// Input for creating a post. New posts always start out `PENDING`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub caption: String,
    pub video_url: String,
    pub scheduled_at: DateTime<Utc>,
}

impl NewPost {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_caption(&self.caption)?;
        validate_video_url(&self.video_url)
    }
}

/// Partial edit of a post. Absent fields are left untouched; status is never
/// part of an edit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostUpdate {
    pub caption: Option<String>,
    pub video_url: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl PostUpdate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(caption) = &self.caption {
            validate_caption(caption)?;
        }
        if let Some(url) = &self.video_url {
            validate_video_url(url)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.caption.is_none() && self.video_url.is_none() && self.scheduled_at.is_none()
    }
}

fn validate_caption(caption: &str) -> Result<(), ValidationError> {
    if caption.trim().is_empty() {
        return Err(ValidationError::EmptyCaption);
    }
    Ok(())
}

fn validate_video_url(url: &str) -> Result<(), ValidationError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyVideoUrl);
    }
    match Url::parse(trimmed) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some() => {
            Ok(())
        }
        _ => Err(ValidationError::InvalidVideoUrl(trimmed.to_string())),
    }
}

/// Publishing credentials: an access token plus the platform account it acts for.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    pub account_id: String,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            account_id: account_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.access_token.trim().is_empty() {
            return Err(ValidationError::EmptyAccessToken);
        }
        if self.account_id.trim().is_empty() {
            return Err(ValidationError::EmptyAccountId);
        }
        Ok(())
    }

    /// Token preview safe to show an operator, e.g. `abcd...wxyz`.
    pub fn preview(&self) -> String {
        let token = &self.access_token;
        let chars: Vec<char> = token.chars().collect();
        if chars.len() > 8 {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        } else {
            token.clone()
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}
