//! Instagram Platform Connector
//!
//! Publishes Reels through the Graph API for business/creator accounts:
//! create a media container from the video URL, wait for Meta to ingest it,
//! then publish the container.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use crate::services::{
    config::InstagramConfig,
    http,
    social::{
        PlatformConnector, PlatformLimits, PublishContent, PublishResult, SocialError,
        SocialPlatform, check, validate_common,
    },
};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v18.0";

pub struct InstagramConnector {
    client: Client,
    access_token: String,
    account_id: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

#[derive(Debug, Deserialize)]
struct MediaContainerResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PermalinkResponse {
    permalink: Option<String>,
}

/// Ingest state of a media container (`status_code` field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    InProgress,
    Finished,
    Published,
    Failed(String),
}

impl ContainerStatus {
    pub fn parse(body: &serde_json::Value) -> Self {
        let code = body["status_code"].as_str().unwrap_or_default();
        match code {
            "FINISHED" => ContainerStatus::Finished,
            "PUBLISHED" => ContainerStatus::Published,
            "ERROR" | "EXPIRED" => {
                let detail = body["status"].as_str().unwrap_or(code);
                ContainerStatus::Failed(detail.to_string())
            }
            _ => ContainerStatus::InProgress,
        }
    }
}

impl InstagramConnector {
    pub fn new(config: &InstagramConfig, timeout_secs: u64) -> Result<Self, SocialError> {
        if config.access_token.trim().is_empty() || config.account_id.trim().is_empty() {
            return Err(SocialError::AuthError(
                "Instagram access token and account id are required".to_string(),
            ));
        }

        Ok(Self {
            client: http::build_client(timeout_secs)?,
            access_token: config.access_token.clone(),
            account_id: config.account_id.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_poll_attempts: config.max_poll_attempts.max(1),
        })
    }

    async fn create_container(&self, content: &PublishContent) -> Result<String, SocialError> {
        let caption = content.caption_with_hashtags(&self.get_limits());
        let params = [
            ("media_type", "REELS"),
            ("video_url", content.video_url.as_str()),
            ("caption", caption.as_str()),
            ("share_to_feed", "true"),
            ("access_token", self.access_token.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/{}/media", GRAPH_API_BASE, self.account_id))
            .form(&params)
            .send()
            .await?;
        let response = check(response).await?;

        let container: MediaContainerResponse = response
            .json()
            .await
            .map_err(|e| SocialError::Parse(e.to_string()))?;
        Ok(container.id)
    }

    async fn container_status(&self, container_id: &str) -> Result<ContainerStatus, SocialError> {
        let response = self
            .client
            .get(format!("{}/{}", GRAPH_API_BASE, container_id))
            .query(&[
                ("fields", "status_code,status"),
                ("access_token", self.access_token.as_str()),
            ])
            .send()
            .await?;
        let response = check(response).await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SocialError::Parse(e.to_string()))?;
        Ok(ContainerStatus::parse(&body))
    }

    /// Video containers are ingested asynchronously; publishing before
    /// `FINISHED` is rejected by the API.
    async fn wait_until_ready(&self, container_id: &str) -> Result<(), SocialError> {
        for attempt in 1..=self.max_poll_attempts {
            tokio::time::sleep(self.poll_interval).await;

            match self.container_status(container_id).await {
                Ok(ContainerStatus::Finished) | Ok(ContainerStatus::Published) => return Ok(()),
                Ok(ContainerStatus::Failed(detail)) => {
                    return Err(SocialError::ProcessingFailed(detail));
                }
                Ok(ContainerStatus::InProgress) => {
                    tracing::debug!(
                        "[INSTAGRAM] Container {} still processing ({}/{})",
                        container_id,
                        attempt,
                        self.max_poll_attempts
                    );
                }
                Err(e) if e.should_retry() => {
                    tracing::warn!("[INSTAGRAM] Status check failed, will poll again: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(SocialError::Timeout(format!(
            "Instagram container {} after {} checks",
            container_id, self.max_poll_attempts
        )))
    }

    async fn permalink(&self, media_id: &str) -> Option<String> {
        let response = self
            .client
            .get(format!("{}/{}", GRAPH_API_BASE, media_id))
            .query(&[
                ("fields", "permalink"),
                ("access_token", self.access_token.as_str()),
            ])
            .send()
            .await
            .ok()?;
        let response = check(response).await.ok()?;
        response.json::<PermalinkResponse>().await.ok()?.permalink
    }
}

#[async_trait]
impl PlatformConnector for InstagramConnector {
    fn platform(&self) -> SocialPlatform {
        SocialPlatform::Instagram
    }

    async fn publish(&self, content: &PublishContent) -> Result<PublishResult, SocialError> {
        self.validate_content(content)?;

        // Step 1: Create media container
        let container_id = self.create_container(content).await?;
        tracing::info!("[INSTAGRAM] Created container {}", container_id);

        // Step 2: Wait for ingest
        self.wait_until_ready(&container_id).await?;

        // Step 3: Publish the container
        let publish_params = [
            ("creation_id", container_id.as_str()),
            ("access_token", self.access_token.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/{}/media_publish", GRAPH_API_BASE, self.account_id))
            .form(&publish_params)
            .send()
            .await?;
        let response = check(response).await?;

        let published: PublishResponse = response
            .json()
            .await
            .map_err(|e| SocialError::Parse(e.to_string()))?;

        let platform_url = self.permalink(&published.id).await;
        if platform_url.is_none() {
            tracing::warn!("[INSTAGRAM] Published {} but permalink lookup failed", published.id);
        }

        Ok(PublishResult {
            platform: SocialPlatform::Instagram,
            platform_post_id: published.id,
            platform_url,
            published_at: Utc::now(),
        })
    }

    fn validate_content(&self, content: &PublishContent) -> Result<(), SocialError> {
        validate_common(content, &self.get_limits())
    }

    fn get_limits(&self) -> PlatformLimits {
        PlatformLimits {
            max_title_length: 2200,
            max_caption_length: 2200,
            max_hashtags: 30,
            max_video_size_bytes: 1024 * 1024 * 1024, // 1GB
            supported_media_types: vec!["video/mp4".to_string(), "video/quicktime".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_container_status_parsing() {
        assert_eq!(
            ContainerStatus::parse(&json!({"status_code": "FINISHED"})),
            ContainerStatus::Finished
        );
        assert_eq!(
            ContainerStatus::parse(&json!({"status_code": "IN_PROGRESS"})),
            ContainerStatus::InProgress
        );
        assert_eq!(ContainerStatus::parse(&json!({})), ContainerStatus::InProgress);
        assert_eq!(
            ContainerStatus::parse(&json!({"status_code": "ERROR", "status": "Error: 2207026"})),
            ContainerStatus::Failed("Error: 2207026".into())
        );
        assert_eq!(
            ContainerStatus::parse(&json!({"status_code": "EXPIRED"})),
            ContainerStatus::Failed("EXPIRED".into())
        );
    }

    #[test]
    fn test_requires_credentials() {
        let config = InstagramConfig {
            access_token: "token".into(),
            account_id: " ".into(),
            poll_interval_secs: 1,
            max_poll_attempts: 3,
        };
        assert!(matches!(
            InstagramConnector::new(&config, 30),
            Err(SocialError::AuthError(_))
        ));
    }

    #[test]
    fn test_limits() {
        let config = InstagramConfig {
            access_token: "token".into(),
            account_id: "1784".into(),
            poll_interval_secs: 1,
            max_poll_attempts: 0,
        };
        let connector = InstagramConnector::new(&config, 30).unwrap();
        assert_eq!(connector.max_poll_attempts, 1);
        assert_eq!(connector.get_limits().max_hashtags, 30);
        assert_eq!(connector.platform(), SocialPlatform::Instagram);
    }
}
