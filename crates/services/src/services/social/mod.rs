//! Publishers
//!
//! One connector per platform behind [`PlatformConnector`]. Connectors hold
//! their own credentials; the [`Publisher`] runs them one after another and
//! keeps each platform's failure to itself.

pub mod connectors;
pub mod publisher;

pub use publisher::{Publisher, PublisherConfig};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utils::text::truncate_chars;

use super::{
    config::PipelineConfig,
    http::{self, ErrorClass},
};
use crate::models::record::{Record, RecordUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocialPlatform {
    YouTube,
    TikTok,
    Instagram,
    WordPress,
}

impl SocialPlatform {
    pub const ALL: [SocialPlatform; 4] = [
        SocialPlatform::YouTube,
        SocialPlatform::TikTok,
        SocialPlatform::Instagram,
        SocialPlatform::WordPress,
    ];

    /// URL already recorded for this platform, if any.
    pub fn recorded_url<'a>(&self, record: &'a Record) -> Option<&'a str> {
        let url = match self {
            SocialPlatform::YouTube => &record.youtube_url,
            SocialPlatform::TikTok => &record.tiktok_url,
            SocialPlatform::Instagram => &record.instagram_url,
            SocialPlatform::WordPress => &record.blog_url,
        };
        url.as_deref().filter(|u| !u.is_empty())
    }

    /// Update that stores a published URL in this platform's column.
    pub fn url_update(&self, url: &str) -> RecordUpdate {
        let mut update = RecordUpdate::default();
        let url = Some(url.to_string());
        match self {
            SocialPlatform::YouTube => update.youtube_url = url,
            SocialPlatform::TikTok => update.tiktok_url = url,
            SocialPlatform::Instagram => update.instagram_url = url,
            SocialPlatform::WordPress => update.blog_url = url,
        }
        update
    }
}

impl std::fmt::Display for SocialPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SocialPlatform::YouTube => "youtube",
            SocialPlatform::TikTok => "tiktok",
            SocialPlatform::Instagram => "instagram",
            SocialPlatform::WordPress => "wordpress",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SocialPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "youtube" => Ok(SocialPlatform::YouTube),
            "tiktok" => Ok(SocialPlatform::TikTok),
            "instagram" => Ok(SocialPlatform::Instagram),
            "wordpress" | "blog" => Ok(SocialPlatform::WordPress),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

#[derive(Debug, Error)]
pub enum SocialError {
    #[error("Authentication failed: {0}")]
    AuthError(String),
    #[error("Rate limited by platform")]
    RateLimited,
    #[error("Content validation failed: {0}")]
    ValidationError(String),
    #[error("Platform API error ({status}): {message}")]
    PlatformError { status: u16, message: String },
    #[error("Platform could not process the video: {0}")]
    ProcessingFailed(String),
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("Unexpected platform response: {0}")]
    Parse(String),
    #[error("Network error: {0}")]
    NetworkError(String, ErrorClass),
}

impl SocialError {
    pub fn should_retry(&self) -> bool {
        match self {
            SocialError::RateLimited | SocialError::Timeout(_) => true,
            SocialError::PlatformError { status, .. } => {
                ErrorClass::from_status(*status).is_transient()
            }
            SocialError::NetworkError(_, class) => class.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => SocialError::AuthError(body),
            429 => SocialError::RateLimited,
            _ => SocialError::PlatformError {
                status,
                message: body,
            },
        }
    }
}

impl From<reqwest::Error> for SocialError {
    fn from(err: reqwest::Error) -> Self {
        let class = ErrorClass::from_reqwest(&err);
        SocialError::NetworkError(err.to_string(), class)
    }
}

/// Pass successful responses through; map the rest onto [`SocialError`].
pub(crate) async fn check(response: reqwest::Response) -> Result<reqwest::Response, SocialError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let (status, body) = http::failure_parts(response).await;
    Err(SocialError::from_status(status.as_u16(), body))
}

/// Result of publishing a post to a platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResult {
    pub platform: SocialPlatform,
    pub platform_post_id: String,
    pub platform_url: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// A countdown entry with its affiliate link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductLink {
    pub rank: usize,
    pub title: String,
    pub price: Option<String>,
    pub url: Option<String>,
}

/// Content to be published, assembled once per record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishContent {
    pub title: String,
    /// Title plus the product list with links.
    pub caption: String,
    pub intro: Option<String>,
    pub video_url: String,
    pub thumbnail_url: Option<String>,
    pub keywords: Vec<String>,
    /// Without `#`, alphanumeric only.
    pub hashtags: Vec<String>,
    /// Countdown order, 5 -> 1.
    pub products: Vec<ProductLink>,
}

pub const AFFILIATE_DISCLOSURE: &str = "As an Amazon Associate I earn from qualifying purchases.";

impl PublishContent {
    /// Fails when the record has no rendered video.
    pub fn from_record(record: &Record) -> Result<Self, SocialError> {
        let video_url = record
            .video_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| SocialError::ValidationError("record has no rendered video".to_string()))?;

        let mut products: Vec<ProductLink> = record
            .filled_products()
            .map(|(slot, product)| ProductLink {
                rank: slot,
                title: product.title.clone().unwrap_or_default(),
                price: product.price.clone(),
                url: product.affiliate_url.clone().or_else(|| product.url.clone()),
            })
            .collect();
        products.sort_by(|a, b| b.rank.cmp(&a.rank));

        let title = record.display_title().to_string();
        let caption = compose_caption(&title, &products);

        Ok(Self {
            title,
            caption,
            intro: record.intro_text.clone(),
            video_url,
            thumbnail_url: record.intro_image_url.clone(),
            keywords: record.keywords.clone(),
            hashtags: hashtags_from_keywords(&record.keywords),
            products,
        })
    }

    /// Caption with up to `limits.max_hashtags` hashtags appended, cut to the
    /// caption limit.
    pub fn caption_with_hashtags(&self, limits: &PlatformLimits) -> String {
        let tags: Vec<String> = self
            .hashtags
            .iter()
            .take(limits.max_hashtags)
            .map(|h| format!("#{}", h))
            .collect();

        let full = if tags.is_empty() {
            self.caption.clone()
        } else {
            format!("{}\n\n{}", self.caption, tags.join(" "))
        };
        truncate_chars(&full, limits.max_caption_length)
    }
}

fn compose_caption(title: &str, products: &[ProductLink]) -> String {
    let mut caption = title.to_string();
    if !products.is_empty() {
        caption.push_str("\n\n");
        for product in products {
            match &product.url {
                Some(url) => caption.push_str(&format!("#{} {}: {}\n", product.rank, product.title, url)),
                None => caption.push_str(&format!("#{} {}\n", product.rank, product.title)),
            }
        }
        caption.push('\n');
        caption.push_str(AFFILIATE_DISCLOSURE);
    }
    caption
}

/// `"gaming mouse"` -> `gamingmouse`. Deduplicated case-insensitively.
pub fn hashtags_from_keywords(keywords: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keywords
        .iter()
        .map(|k| {
            k.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect()
}

/// Platform content limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformLimits {
    pub max_title_length: usize,
    pub max_caption_length: usize,
    pub max_hashtags: usize,
    pub max_video_size_bytes: usize,
    pub supported_media_types: Vec<String>,
}

/// MIME type implied by the extension of a video URL path.
pub fn video_media_type(url: &url::Url) -> Option<&'static str> {
    let (_, ext) = url.path().rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "webm" => Some("video/webm"),
        _ => None,
    }
}

/// Checks shared by every connector. URLs without a known video extension
/// are let through.
pub fn validate_common(content: &PublishContent, limits: &PlatformLimits) -> Result<(), SocialError> {
    if content.title.trim().is_empty() {
        return Err(SocialError::ValidationError("title is empty".to_string()));
    }
    let url = url::Url::parse(&content.video_url)
        .map_err(|e| SocialError::ValidationError(format!("invalid video url: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SocialError::ValidationError(format!(
            "video url must be http(s), got {}",
            url.scheme()
        )));
    }
    if let Some(media_type) = video_media_type(&url) {
        if !limits.supported_media_types.iter().any(|t| t == media_type) {
            return Err(SocialError::ValidationError(format!(
                "{} videos are not supported",
                media_type
            )));
        }
    }
    Ok(())
}

/// Trait for platform-specific connectors
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    /// Get the platform this connector handles
    fn platform(&self) -> SocialPlatform;

    /// Publish content to the platform
    async fn publish(&self, content: &PublishContent) -> Result<PublishResult, SocialError>;

    /// Validate content before publishing
    fn validate_content(&self, content: &PublishContent) -> Result<(), SocialError>;

    /// Get platform-specific limits
    fn get_limits(&self) -> PlatformLimits;
}

/// Connectors for every platform with a config section. Platforms without
/// one are returned in the second list.
pub fn build_connectors(
    config: &PipelineConfig,
) -> Result<(Vec<Arc<dyn PlatformConnector>>, Vec<SocialPlatform>), SocialError> {
    use connectors::{
        instagram::InstagramConnector, tiktok::TikTokConnector, wordpress::WordPressConnector,
        youtube::YouTubeConnector,
    };

    let timeout = config.http_timeout_secs;
    let mut enabled: Vec<Arc<dyn PlatformConnector>> = Vec::new();
    let mut disabled = Vec::new();

    match &config.youtube {
        Some(yt) => enabled.push(Arc::new(YouTubeConnector::new(yt, timeout)?)),
        None => disabled.push(SocialPlatform::YouTube),
    }
    match &config.tiktok {
        Some(tt) => enabled.push(Arc::new(TikTokConnector::new(tt, timeout)?)),
        None => disabled.push(SocialPlatform::TikTok),
    }
    match &config.instagram {
        Some(ig) => enabled.push(Arc::new(InstagramConnector::new(ig, timeout)?)),
        None => disabled.push(SocialPlatform::Instagram),
    }
    match &config.wordpress {
        Some(wp) => enabled.push(Arc::new(WordPressConnector::new(wp, timeout)?)),
        None => disabled.push(SocialPlatform::WordPress),
    }

    Ok((enabled, disabled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::ProductSlot;

    fn published_record() -> Record {
        let mut record = Record::new("rec1", "Top 5 Gaming Mice");
        record.optimized_title = Some("Best Gaming Mice of 2025".into());
        record.keywords = vec!["gaming mouse".into(), "RGB".into(), "rgb".into(), "wireless!".into()];
        record.video_url = Some("https://cdn.json2video.com/out.mp4".into());
        for slot in 1..=5 {
            record.products[slot - 1] = ProductSlot {
                title: Some(format!("Mouse {slot}")),
                affiliate_url: Some(format!("https://www.amazon.com/dp/B00000000{slot}?tag=mytag-20")),
                ..Default::default()
            };
        }
        record
    }

    fn limits(max_caption_length: usize, max_hashtags: usize) -> PlatformLimits {
        PlatformLimits {
            max_title_length: 100,
            max_caption_length,
            max_hashtags,
            max_video_size_bytes: 1024,
            supported_media_types: vec!["video/mp4".into()],
        }
    }

    #[test]
    fn test_content_from_record() {
        let content = PublishContent::from_record(&published_record()).unwrap();

        assert_eq!(content.title, "Best Gaming Mice of 2025");
        assert_eq!(content.hashtags, vec!["gamingmouse", "rgb", "wireless"]);
        let ranks: Vec<usize> = content.products.iter().map(|p| p.rank).collect();
        assert_eq!(ranks, vec![5, 4, 3, 2, 1]);

        assert!(content.caption.starts_with("Best Gaming Mice of 2025\n\n#5 Mouse 5: "));
        assert!(content.caption.contains("#1 Mouse 1: https://www.amazon.com/dp/B000000001?tag=mytag-20"));
        assert!(content.caption.ends_with(AFFILIATE_DISCLOSURE));
    }

    #[test]
    fn test_content_requires_video() {
        let mut record = published_record();
        record.video_url = None;
        assert!(matches!(
            PublishContent::from_record(&record),
            Err(SocialError::ValidationError(_))
        ));
    }

    #[test]
    fn test_caption_respects_limits() {
        let content = PublishContent::from_record(&published_record()).unwrap();

        let caption = content.caption_with_hashtags(&limits(5000, 2));
        assert!(caption.ends_with("#gamingmouse #rgb"));

        let caption = content.caption_with_hashtags(&limits(5000, 0));
        assert_eq!(caption, content.caption);

        let caption = content.caption_with_hashtags(&limits(20, 30));
        assert!(caption.chars().count() <= 20);
    }

    #[test]
    fn test_validate_common() {
        let limits = limits(5000, 10);
        let mut content = PublishContent::from_record(&published_record()).unwrap();
        assert!(validate_common(&content, &limits).is_ok());

        content.video_url = "ftp://example.com/v.mp4".into();
        assert!(validate_common(&content, &limits).is_err());

        content.video_url = "not a url".into();
        assert!(validate_common(&content, &limits).is_err());
    }

    #[test]
    fn test_validate_common_checks_media_type() {
        let limits = limits(5000, 10);
        let mut content = PublishContent::from_record(&published_record()).unwrap();

        content.video_url = "https://cdn.example.com/out.webm".into();
        assert!(matches!(
            validate_common(&content, &limits),
            Err(SocialError::ValidationError(msg)) if msg.contains("video/webm")
        ));

        content.video_url = "https://cdn.example.com/OUT.MP4?sig=abc".into();
        assert!(validate_common(&content, &limits).is_ok());

        content.video_url = "https://drive.example.com/uc?id=123".into();
        assert!(validate_common(&content, &limits).is_ok());
    }

    #[test]
    fn test_platform_urls() {
        let mut record = published_record();
        assert!(SocialPlatform::YouTube.recorded_url(&record).is_none());

        record.apply(&SocialPlatform::WordPress.url_update("https://blog.example.com/p/1"));
        assert_eq!(
            SocialPlatform::WordPress.recorded_url(&record),
            Some("https://blog.example.com/p/1")
        );
        assert_eq!("blog".parse::<SocialPlatform>().unwrap(), SocialPlatform::WordPress);
        assert_eq!(SocialPlatform::TikTok.to_string(), "tiktok");
    }

    #[test]
    fn test_error_classification() {
        assert!(SocialError::from_status(503, String::new()).should_retry());
        assert!(SocialError::from_status(429, String::new()).should_retry());
        assert!(matches!(
            SocialError::from_status(401, "expired".into()),
            SocialError::AuthError(_)
        ));
        assert!(!SocialError::from_status(400, String::new()).should_retry());
        assert!(!SocialError::ValidationError("x".into()).should_retry());
    }

    #[test]
    fn test_build_connectors_reports_disabled() {
        let mut config = PipelineConfig::default();
        config.wordpress = Some(crate::services::config::WordPressConfig {
            site_url: "https://blog.example.com".into(),
            username: "editor".into(),
            application_password: "abcd efgh".into(),
            post_status: "publish".into(),
        });

        let (enabled, disabled) = build_connectors(&config).unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].platform(), SocialPlatform::WordPress);
        assert_eq!(
            disabled,
            vec![SocialPlatform::YouTube, SocialPlatform::TikTok, SocialPlatform::Instagram]
        );
    }
}
