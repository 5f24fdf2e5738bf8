//! Publisher
//!
//! Runs every enabled connector for a record, one platform at a time. A
//! failure on one platform never stops the others.

use std::{sync::Arc, time::Duration};

use tracing::{error, info, warn};

use super::{PlatformConnector, PublishContent, PublishResult, SocialError, SocialPlatform};
use crate::models::record::Record;

/// Publisher configuration
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(30),
        }
    }
}

pub type PlatformOutcome = (SocialPlatform, Result<PublishResult, SocialError>);

pub struct Publisher {
    connectors: Vec<Arc<dyn PlatformConnector>>,
    config: PublisherConfig,
}

impl Publisher {
    pub fn new(connectors: Vec<Arc<dyn PlatformConnector>>) -> Self {
        Self {
            connectors,
            config: PublisherConfig::default(),
        }
    }

    pub fn with_config(connectors: Vec<Arc<dyn PlatformConnector>>, config: PublisherConfig) -> Self {
        Self { connectors, config }
    }

    pub fn platforms(&self) -> Vec<SocialPlatform> {
        self.connectors.iter().map(|c| c.platform()).collect()
    }

    /// Publish the record's video to every platform that has no URL recorded
    /// yet. Platforms already published are left out of the result.
    pub async fn publish_all(&self, record: &Record) -> Vec<PlatformOutcome> {
        let pending: Vec<&Arc<dyn PlatformConnector>> = self
            .connectors
            .iter()
            .filter(|c| match c.platform().recorded_url(record) {
                Some(url) => {
                    info!("[PUBLISH] {} already has {}, skipping", c.platform(), url);
                    false
                }
                None => true,
            })
            .collect();

        let content = match PublishContent::from_record(record) {
            Ok(content) => content,
            Err(e) => {
                let message = e.to_string();
                return pending
                    .iter()
                    .map(|c| (c.platform(), Err(SocialError::ValidationError(message.clone()))))
                    .collect();
            }
        };

        let mut outcomes = Vec::with_capacity(pending.len());
        for connector in pending {
            let platform = connector.platform();
            let result = self.publish_with_retry(connector.as_ref(), &content).await;
            match &result {
                Ok(published) => info!(
                    "[PUBLISH] {} published record {} as {} ({})",
                    platform,
                    record.id,
                    published.platform_post_id,
                    published.platform_url.as_deref().unwrap_or("no url")
                ),
                Err(e) => error!("[PUBLISH] {} failed for record {}: {}", platform, record.id, e),
            }
            outcomes.push((platform, result));
        }
        outcomes
    }

    /// Only rate limiting is retried here; any other failure may have left a
    /// post behind on the platform.
    async fn publish_with_retry(
        &self,
        connector: &dyn PlatformConnector,
        content: &PublishContent,
    ) -> Result<PublishResult, SocialError> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                info!(
                    "[PUBLISH] Retrying {} (attempt {}/{})",
                    connector.platform(),
                    attempt + 1,
                    self.config.max_retries + 1
                );
                tokio::time::sleep(self.config.retry_delay * attempt).await;
            }

            match connector.publish(content).await {
                Ok(result) => return Ok(result),
                Err(SocialError::RateLimited) => {
                    warn!("[PUBLISH] {} rate limited, will retry after delay", connector.platform());
                    last_error = Some(SocialError::RateLimited);
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        Err(last_error.unwrap_or(SocialError::RateLimited))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::services::social::PlatformLimits;

    struct FakeConnector {
        platform: SocialPlatform,
        rate_limited_times: u32,
        fail_with: Option<fn() -> SocialError>,
        calls: AtomicU32,
    }

    impl FakeConnector {
        fn ok(platform: SocialPlatform) -> Self {
            Self {
                platform,
                rate_limited_times: 0,
                fail_with: None,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PlatformConnector for FakeConnector {
        fn platform(&self) -> SocialPlatform {
            self.platform
        }

        async fn publish(&self, content: &PublishContent) -> Result<PublishResult, SocialError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.rate_limited_times {
                return Err(SocialError::RateLimited);
            }
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            Ok(PublishResult {
                platform: self.platform,
                platform_post_id: format!("{}-post", self.platform),
                platform_url: Some(format!("https://{}.example.com/{}", self.platform, content.title.len())),
                published_at: Utc::now(),
            })
        }

        fn validate_content(&self, _content: &PublishContent) -> Result<(), SocialError> {
            Ok(())
        }

        fn get_limits(&self) -> PlatformLimits {
            PlatformLimits {
                max_title_length: 100,
                max_caption_length: 1000,
                max_hashtags: 5,
                max_video_size_bytes: 1024,
                supported_media_types: vec![],
            }
        }
    }

    fn expired() -> SocialError {
        SocialError::AuthError("expired".into())
    }

    fn record() -> Record {
        let mut record = Record::new("rec1", "Top 5 Gaming Mice");
        record.video_url = Some("https://cdn.example.com/v.mp4".into());
        record
    }

    fn fast() -> PublisherConfig {
        PublisherConfig {
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let failing = Arc::new(FakeConnector {
            fail_with: Some(expired),
            ..FakeConnector::ok(SocialPlatform::YouTube)
        });
        let ok = Arc::new(FakeConnector::ok(SocialPlatform::WordPress));
        let publisher = Publisher::with_config(vec![failing.clone(), ok.clone()], fast());

        let outcomes = publisher.publish_all(&record()).await;

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], (SocialPlatform::YouTube, Err(SocialError::AuthError(_)))));
        assert!(outcomes[1].1.is_ok());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let connector = Arc::new(FakeConnector {
            rate_limited_times: 2,
            ..FakeConnector::ok(SocialPlatform::TikTok)
        });
        let publisher = Publisher::with_config(vec![connector.clone()], fast());

        let outcomes = publisher.publish_all(&record()).await;

        assert!(outcomes[0].1.is_ok());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_gives_up() {
        let connector = Arc::new(FakeConnector {
            rate_limited_times: 10,
            ..FakeConnector::ok(SocialPlatform::TikTok)
        });
        let publisher = Publisher::with_config(vec![connector.clone()], fast());

        let outcomes = publisher.publish_all(&record()).await;

        assert!(matches!(outcomes[0].1, Err(SocialError::RateLimited)));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_already_published_platforms_are_skipped() {
        let youtube = Arc::new(FakeConnector::ok(SocialPlatform::YouTube));
        let instagram = Arc::new(FakeConnector::ok(SocialPlatform::Instagram));
        let publisher = Publisher::with_config(vec![youtube.clone(), instagram.clone()], fast());

        let mut record = record();
        record.youtube_url = Some("https://www.youtube.com/watch?v=abc".into());
        let outcomes = publisher.publish_all(&record).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, SocialPlatform::Instagram);
        assert_eq!(youtube.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_video_fails_every_platform() {
        let connector = Arc::new(FakeConnector::ok(SocialPlatform::YouTube));
        let publisher = Publisher::with_config(vec![connector.clone()], fast());

        let outcomes = publisher.publish_all(&Record::new("rec2", "No video")).await;

        assert!(matches!(outcomes[0].1, Err(SocialError::ValidationError(_))));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(publisher.platforms(), vec![SocialPlatform::YouTube]);
    }
}
