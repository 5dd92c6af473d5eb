use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{PublishClient, PublishOutcome, PublishRequest};
use crate::config;
use crate::model::Credentials;

pub const RATE_LIMITED: &str = "rate_limited";

/// Platform error codes that signal throttling.
const THROTTLE_CODES: &[i64] = &[4, 17, 32, 613];

/// Reels publisher for the Graph API: create a media container, wait for the
/// platform to finish ingesting the video, then publish the container.
#[derive(Clone)]
pub struct GraphPublisher {
    http: Client,
    base_url: Url,
    version: String,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl fmt::Debug for GraphPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphPublisher")
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Finished,
    InProgress,
    Error,
    Expired,
    Published,
    Unknown,
}

impl ContainerStatus {
    fn parse(code: &str) -> Self {
        match code {
            "FINISHED" => ContainerStatus::Finished,
            "IN_PROGRESS" => ContainerStatus::InProgress,
            "ERROR" => ContainerStatus::Error,
            "EXPIRED" => ContainerStatus::Expired,
            "PUBLISHED" => ContainerStatus::Published,
            _ => ContainerStatus::Unknown,
        }
    }
}

impl GraphPublisher {
    pub fn from_config(cfg: &config::Publisher) -> Result<Self> {
        let base_url = Url::parse(&cfg.api_base).context("invalid publisher.api_base")?;
        Self::with_base_url(
            base_url,
            cfg.api_version.clone(),
            Duration::from_secs(cfg.request_timeout_secs),
            Duration::from_millis(cfg.status_poll_interval_ms),
            cfg.status_poll_attempts,
        )
    }

    pub fn with_base_url(
        base_url: Url,
        version: String,
        timeout: Duration,
        poll_interval: Duration,
        poll_attempts: u32,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("reel-scheduler/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url,
            version: version.trim_matches('/').to_string(),
            poll_interval,
            poll_attempts: poll_attempts.max(1),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(&format!("{}/{}", self.version, path))
            .context("invalid Graph API base URL")
    }

    pub fn build_container_request(&self, req: PublishRequest<'_>) -> Result<reqwest::Request> {
        let url = self.endpoint(&format!("{}/media", req.credentials.account_id))?;
        self.http
            .request(Method::POST, url)
            .bearer_auth(&req.credentials.access_token)
            .form(&[
                ("media_type", "REELS"),
                ("video_url", req.video_url),
                ("caption", req.caption),
            ])
            .build()
            .context("failed to build container request")
    }

    pub fn build_status_request(
        &self,
        container_id: &str,
        creds: &Credentials,
    ) -> Result<reqwest::Request> {
        let url = self.endpoint(container_id)?;
        self.http
            .request(Method::GET, url)
            .bearer_auth(&creds.access_token)
            .query(&[("fields", "status_code")])
            .build()
            .context("failed to build status request")
    }

    pub fn build_publish_request(
        &self,
        container_id: &str,
        creds: &Credentials,
    ) -> Result<reqwest::Request> {
        let url = self.endpoint(&format!("{}/media_publish", creds.account_id))?;
        self.http
            .request(Method::POST, url)
            .bearer_auth(&creds.access_token)
            .form(&[("creation_id", container_id)])
            .build()
            .context("failed to build publish request")
    }

    /// Execute a request and return the response body, mapping every failure
    /// to the reason string recorded on the post.
    async fn execute(&self, request: reqwest::Request) -> Result<String, String> {
        let path = request.url().path().to_string();
        debug!(method = %request.method(), %path, "graph api request");
        let res = self
            .http
            .execute(request)
            .await
            .map_err(|err| format!("network error: {}", err))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|err| format!("network error: {}", err))?;
        if !status.is_success() {
            let reason = classify_error(status, &body);
            warn!(%status, %path, %reason, "graph api error");
            return Err(reason);
        }
        Ok(body)
    }

    async fn create_container(&self, req: PublishRequest<'_>) -> Result<String, String> {
        let request = self
            .build_container_request(req)
            .map_err(|err| format!("{:#}", err))?;
        let body = self.execute(request).await?;
        parse_id(&body)
    }

    async fn wait_until_ready(&self, container_id: &str, creds: &Credentials) -> Result<(), String> {
        for attempt in 1..=self.poll_attempts {
            let request = self
                .build_status_request(container_id, creds)
                .map_err(|err| format!("{:#}", err))?;
            let body = self.execute(request).await?;
            let status = parse_status(&body)?;
            debug!(container_id, attempt, ?status, "container status");
            match status {
                ContainerStatus::Finished | ContainerStatus::Published => return Ok(()),
                ContainerStatus::Error => return Err("video processing failed".into()),
                ContainerStatus::Expired => return Err("media container expired".into()),
                ContainerStatus::InProgress | ContainerStatus::Unknown => {}
            }
            if attempt < self.poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Err("timed out waiting for video processing".into())
    }

    async fn publish_container(
        &self,
        container_id: &str,
        creds: &Credentials,
    ) -> Result<String, String> {
        let request = self
            .build_publish_request(container_id, creds)
            .map_err(|err| format!("{:#}", err))?;
        let body = self.execute(request).await?;
        parse_id(&body)
    }
}

#[async_trait]
impl PublishClient for GraphPublisher {
    #[instrument(skip_all, fields(account_id = %request.credentials.account_id))]
    async fn publish(&self, request: PublishRequest<'_>) -> PublishOutcome {
        let result = async {
            let container_id = self.create_container(request).await?;
            self.wait_until_ready(&container_id, request.credentials)
                .await?;
            self.publish_container(&container_id, request.credentials)
                .await
        }
        .await;

        match result {
            Ok(media_id) => {
                info!(%media_id, "reel published");
                PublishOutcome::Published {
                    external_id: media_id,
                }
            }
            Err(reason) => PublishOutcome::Failed { reason },
        }
    }
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status_code: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: GraphError,
}

#[derive(Deserialize)]
struct GraphError {
    message: Option<String>,
    code: Option<i64>,
}

fn parse_id(body: &str) -> Result<String, String> {
    serde_json::from_str::<IdResponse>(body)
        .map(|r| r.id)
        .map_err(|err| format!("invalid platform response: {}", err))
}

fn parse_status(body: &str) -> Result<ContainerStatus, String> {
    let resp: StatusResponse = serde_json::from_str(body)
        .map_err(|err| format!("invalid platform response: {}", err))?;
    Ok(resp
        .status_code
        .as_deref()
        .map(ContainerStatus::parse)
        .unwrap_or(ContainerStatus::Unknown))
}

/// Turn a non-success response into the failure reason stored on the post.
pub fn classify_error(status: StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let code = parsed.as_ref().and_then(|e| e.error.code);
    if status == StatusCode::TOO_MANY_REQUESTS || code.is_some_and(|c| THROTTLE_CODES.contains(&c))
    {
        return RATE_LIMITED.to_string();
    }
    match parsed.and_then(|e| e.error.message) {
        Some(message) if !message.trim().is_empty() => message,
        _ => format!("platform error {}", status),
    }
}
