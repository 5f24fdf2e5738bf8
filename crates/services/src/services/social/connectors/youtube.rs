//! YouTube Platform Connector
//!
//! Data API v3 resumable upload: open an upload session with the video
//! metadata, then PUT the rendered file into the session URL.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, header};
use serde::Deserialize;
use serde_json::{Value, json};
use utils::text::truncate_chars;

use crate::services::{
    config::YouTubeConfig,
    http,
    social::{
        PlatformConnector, PlatformLimits, PublishContent, PublishResult, SocialError,
        SocialPlatform, check, validate_common,
    },
};

const YOUTUBE_UPLOAD_URL: &str =
    "https://www.googleapis.com/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status";
const MAX_TAGS_CHARS: usize = 500;

pub struct YouTubeConnector {
    client: Client,
    access_token: String,
    privacy_status: String,
    category_id: String,
}

#[derive(Debug, Deserialize)]
struct VideoResource {
    id: String,
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Angle brackets are rejected in titles and descriptions.
fn sanitize(text: &str) -> String {
    text.replace(['<', '>'], "")
}

/// Keep tags while their combined length stays under the API's cap.
fn fit_tags(keywords: &[String]) -> Vec<String> {
    let mut total = 0;
    keywords
        .iter()
        .map(|k| sanitize(k.trim()))
        .filter(|k| !k.is_empty())
        .take_while(|k| {
            total += k.chars().count() + 1;
            total <= MAX_TAGS_CHARS
        })
        .collect()
}

impl YouTubeConnector {
    pub fn new(config: &YouTubeConfig, timeout_secs: u64) -> Result<Self, SocialError> {
        if config.access_token.trim().is_empty() {
            return Err(SocialError::AuthError("YouTube access token is required".to_string()));
        }

        Ok(Self {
            client: http::build_client(timeout_secs)?,
            access_token: config.access_token.clone(),
            privacy_status: config.privacy_status.clone(),
            category_id: config.category_id.clone(),
        })
    }

    fn metadata(&self, content: &PublishContent) -> Value {
        let limits = self.get_limits();
        let mut description = String::new();
        if let Some(intro) = content.intro.as_deref().filter(|i| !i.trim().is_empty()) {
            description.push_str(intro.trim());
            description.push_str("\n\n");
        }
        description.push_str(&content.caption_with_hashtags(&limits));

        json!({
            "snippet": {
                "title": truncate_chars(&sanitize(&content.title), limits.max_title_length),
                "description": truncate_chars(&sanitize(&description), limits.max_caption_length),
                "tags": fit_tags(&content.keywords),
                "categoryId": self.category_id,
            },
            "status": {
                "privacyStatus": self.privacy_status,
                "selfDeclaredMadeForKids": false,
            }
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, SocialError> {
        let response = self.client.get(url).send().await?;
        let response = check(response).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SocialError::ValidationError(format!("video at {} is empty", url)));
        }
        Ok(bytes.to_vec())
    }

    async fn start_session(&self, metadata: &Value, size: usize) -> Result<String, SocialError> {
        let response = self
            .client
            .post(YOUTUBE_UPLOAD_URL)
            .bearer_auth(&self.access_token)
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", size.to_string())
            .json(metadata)
            .send()
            .await?;
        let response = check(response).await?;

        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| SocialError::Parse("upload session has no Location header".to_string()))
    }
}

#[async_trait]
impl PlatformConnector for YouTubeConnector {
    fn platform(&self) -> SocialPlatform {
        SocialPlatform::YouTube
    }

    async fn publish(&self, content: &PublishContent) -> Result<PublishResult, SocialError> {
        self.validate_content(content)?;

        let video = self.download(&content.video_url).await?;
        if video.len() > self.get_limits().max_video_size_bytes {
            return Err(SocialError::ValidationError(format!(
                "video is {} bytes, over the upload limit",
                video.len()
            )));
        }
        tracing::debug!("[YOUTUBE] Uploading {} bytes", video.len());

        let session_url = self.start_session(&self.metadata(content), video.len()).await?;

        let response = self
            .client
            .put(&session_url)
            .bearer_auth(&self.access_token)
            .header(header::CONTENT_TYPE, "video/mp4")
            .body(video)
            .send()
            .await?;
        let response = check(response).await?;

        let uploaded: VideoResource = response
            .json()
            .await
            .map_err(|e| SocialError::Parse(e.to_string()))?;

        Ok(PublishResult {
            platform: SocialPlatform::YouTube,
            platform_url: Some(watch_url(&uploaded.id)),
            platform_post_id: uploaded.id,
            published_at: Utc::now(),
        })
    }

    fn validate_content(&self, content: &PublishContent) -> Result<(), SocialError> {
        validate_common(content, &self.get_limits())
    }

    fn get_limits(&self) -> PlatformLimits {
        PlatformLimits {
            max_title_length: 100,
            max_caption_length: 5000,
            max_hashtags: 15,
            max_video_size_bytes: 256 * 1024 * 1024 * 1024, // 256GB
            supported_media_types: vec!["video/mp4".to_string(), "video/quicktime".to_string()],
        }
    }
}
