//! TikTok Platform Connector
//!
//! Content Posting API, direct post with `PULL_FROM_URL`: TikTok downloads
//! the rendered video itself, so the URL's domain must be verified in the
//! developer portal.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{Value, json};

use crate::services::{
    config::TikTokConfig,
    http,
    social::{
        PlatformConnector, PlatformLimits, PublishContent, PublishResult, SocialError,
        SocialPlatform, check, validate_common,
    },
};

const TIKTOK_API_BASE: &str = "https://open.tiktokapis.com/v2";

pub struct TikTokConnector {
    client: Client,
    access_token: String,
    privacy_level: String,
    username: Option<String>,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

/// `status` of a publish job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishState {
    Processing(String),
    Complete { post_id: Option<String> },
    Failed(String),
}

impl PublishState {
    /// Parse the `data` object of a status fetch.
    pub fn parse(data: &Value) -> Self {
        let status = data["status"].as_str().unwrap_or_default();
        match status {
            "PUBLISH_COMPLETE" => {
                // The API spells this field "publicaly".
                let post_id = data["publicaly_available_post_id"]
                    .as_array()
                    .and_then(|ids| ids.first())
                    .and_then(|id| match id {
                        Value::Number(n) => Some(n.to_string()),
                        Value::String(s) => Some(s.clone()),
                        _ => None,
                    });
                PublishState::Complete { post_id }
            }
            "FAILED" => PublishState::Failed(
                data["fail_reason"].as_str().unwrap_or("unknown").to_string(),
            ),
            other => PublishState::Processing(other.to_string()),
        }
    }
}

/// Map the `error` envelope every v2 response carries.
fn api_error(status: u16, body: &Value) -> Option<SocialError> {
    let code = body["error"]["code"].as_str().unwrap_or("ok");
    if code == "ok" {
        return None;
    }
    let message = body["error"]["message"].as_str().unwrap_or(code).to_string();
    Some(match code {
        "access_token_invalid" | "scope_not_authorized" => SocialError::AuthError(message),
        "rate_limit_exceeded" | "spam_risk_too_many_posts" => SocialError::RateLimited,
        _ => SocialError::PlatformError {
            status,
            message: format!("{}: {}", code, message),
        },
    })
}

/// Public URL of a post, when the account handle is known.
pub fn post_url(username: Option<&str>, post_id: &str) -> Option<String> {
    let username = username?.trim().trim_start_matches('@');
    if username.is_empty() {
        return None;
    }
    Some(format!("https://www.tiktok.com/@{}/video/{}", username, post_id))
}

impl TikTokConnector {
    pub fn new(config: &TikTokConfig, timeout_secs: u64) -> Result<Self, SocialError> {
        if config.access_token.trim().is_empty() {
            return Err(SocialError::AuthError("TikTok access token is required".to_string()));
        }

        Ok(Self {
            client: http::build_client(timeout_secs)?,
            access_token: config.access_token.clone(),
            privacy_level: config.privacy_level.clone(),
            username: config.username.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_poll_attempts: config.max_poll_attempts.max(1),
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, SocialError> {
        let response = self
            .client
            .post(format!("{}{}", TIKTOK_API_BASE, path))
            .bearer_auth(&self.access_token)
            .header("Content-Type", "application/json; charset=UTF-8")
            .json(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let response = check(response).await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| SocialError::Parse(e.to_string()))?;
        match api_error(status, &body) {
            Some(err) => Err(err),
            None => Ok(body),
        }
    }

    fn init_body(&self, content: &PublishContent) -> Value {
        json!({
            "post_info": {
                "title": content.caption_with_hashtags(&self.get_limits()),
                "privacy_level": self.privacy_level,
                "disable_duet": false,
                "disable_comment": false,
                "disable_stitch": false,
            },
            "source_info": {
                "source": "PULL_FROM_URL",
                "video_url": content.video_url,
            }
        })
    }

    async fn wait_for_publish(&self, publish_id: &str) -> Result<Option<String>, SocialError> {
        let body = json!({ "publish_id": publish_id });

        for attempt in 1..=self.max_poll_attempts {
            tokio::time::sleep(self.poll_interval).await;

            let response = match self.post_json("/post/publish/status/fetch/", &body).await {
                Ok(response) => response,
                Err(e) if e.should_retry() => {
                    tracing::warn!("[TIKTOK] Status check failed, will poll again: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match PublishState::parse(&response["data"]) {
                PublishState::Complete { post_id } => return Ok(post_id),
                PublishState::Failed(reason) => return Err(SocialError::ProcessingFailed(reason)),
                PublishState::Processing(state) => {
                    tracing::debug!(
                        "[TIKTOK] Publish {} is {} ({}/{})",
                        publish_id,
                        state,
                        attempt,
                        self.max_poll_attempts
                    );
                }
            }
        }

        Err(SocialError::Timeout(format!(
            "TikTok publish {} after {} checks",
            publish_id, self.max_poll_attempts
        )))
    }
}

#[async_trait]
impl PlatformConnector for TikTokConnector {
    fn platform(&self) -> SocialPlatform {
        SocialPlatform::TikTok
    }

    async fn publish(&self, content: &PublishContent) -> Result<PublishResult, SocialError> {
        self.validate_content(content)?;

        let response = self
            .post_json("/post/publish/video/init/", &self.init_body(content))
            .await?;
        let publish_id = response["data"]["publish_id"]
            .as_str()
            .ok_or_else(|| SocialError::Parse("init response has no publish_id".to_string()))?
            .to_string();
        tracing::info!("[TIKTOK] Publish job {} started", publish_id);

        let post_id = self.wait_for_publish(&publish_id).await?;
        let platform_url = post_id
            .as_deref()
            .and_then(|id| post_url(self.username.as_deref(), id));
        if platform_url.is_none() {
            tracing::warn!(
                "[TIKTOK] Published {} but no public URL could be built (username or post id missing)",
                publish_id
            );
        }

        Ok(PublishResult {
            platform: SocialPlatform::TikTok,
            platform_post_id: post_id.unwrap_or(publish_id),
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
            max_hashtags: 10,
            max_video_size_bytes: 4 * 1024 * 1024 * 1024, // 4GB
            supported_media_types: vec!["video/mp4".to_string(), "video/webm".to_string()],
        }
    }
}
