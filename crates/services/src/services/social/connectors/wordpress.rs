//! WordPress Platform Connector
//!
//! Creates a post through the REST API using an application password.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::services::{
    config::WordPressConfig,
    http,
    social::{
        AFFILIATE_DISCLOSURE, PlatformConnector, PlatformLimits, PublishContent, PublishResult,
        SocialError, SocialPlatform, check, validate_common,
    },
};

pub struct WordPressConnector {
    client: Client,
    site_url: String,
    username: String,
    application_password: String,
    post_status: String,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    id: u64,
    link: Option<String>,
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Post body: intro, embedded video, then the ranked product list.
pub fn render_post_html(content: &PublishContent) -> String {
    let mut html = String::new();

    if let Some(intro) = content.intro.as_deref().filter(|i| !i.trim().is_empty()) {
        html.push_str(&format!("<p>{}</p>\n", escape_html(intro.trim())));
    }

    html.push_str(&format!(
        "<video controls src=\"{}\"></video>\n",
        escape_html(&content.video_url)
    ));

    if !content.products.is_empty() {
        html.push_str("<ol reversed>\n");
        for product in &content.products {
            let name = escape_html(&product.title);
            let label = match &product.price {
                Some(price) => format!("{} ({})", name, escape_html(price)),
                None => name,
            };
            match &product.url {
                Some(url) => html.push_str(&format!(
                    "<li><a href=\"{}\" rel=\"sponsored nofollow\">{}</a></li>\n",
                    escape_html(url),
                    label
                )),
                None => html.push_str(&format!("<li>{}</li>\n", label)),
            }
        }
        html.push_str("</ol>\n");
        html.push_str(&format!("<p><em>{}</em></p>\n", AFFILIATE_DISCLOSURE));
    }

    html
}

impl WordPressConnector {
    pub fn new(config: &WordPressConfig, timeout_secs: u64) -> Result<Self, SocialError> {
        let site_url = config.site_url.trim().trim_end_matches('/').to_string();
        url::Url::parse(&site_url)
            .map_err(|e| SocialError::ValidationError(format!("invalid WordPress site url: {}", e)))?;
        if config.username.trim().is_empty() || config.application_password.trim().is_empty() {
            return Err(SocialError::AuthError(
                "WordPress username and application password are required".to_string(),
            ));
        }

        Ok(Self {
            client: http::build_client(timeout_secs)?,
            site_url,
            username: config.username.clone(),
            application_password: config.application_password.clone(),
            post_status: config.post_status.clone(),
        })
    }

    fn posts_url(&self) -> String {
        format!("{}/wp-json/wp/v2/posts", self.site_url)
    }
}

#[async_trait]
impl PlatformConnector for WordPressConnector {
    fn platform(&self) -> SocialPlatform {
        SocialPlatform::WordPress
    }

    async fn publish(&self, content: &PublishContent) -> Result<PublishResult, SocialError> {
        self.validate_content(content)?;

        let body = json!({
            "title": content.title,
            "content": render_post_html(content),
            "excerpt": content.intro.clone().unwrap_or_default(),
            "status": self.post_status,
        });

        let response = self
            .client
            .post(self.posts_url())
            .basic_auth(&self.username, Some(&self.application_password))
            .json(&body)
            .send()
            .await?;
        let response = check(response).await?;

        let post: PostResponse = response
            .json()
            .await
            .map_err(|e| SocialError::Parse(e.to_string()))?;

        Ok(PublishResult {
            platform: SocialPlatform::WordPress,
            platform_post_id: post.id.to_string(),
            platform_url: post.link,
            published_at: Utc::now(),
        })
    }

    fn validate_content(&self, content: &PublishContent) -> Result<(), SocialError> {
        validate_common(content, &self.get_limits())
    }

    fn get_limits(&self) -> PlatformLimits {
        PlatformLimits {
            max_title_length: 200,
            max_caption_length: 100_000,
            max_hashtags: 0,
            max_video_size_bytes: usize::MAX,
            supported_media_types: vec!["video/mp4".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::social::ProductLink;

    fn content() -> PublishContent {
        PublishContent {
            title: "Top 5 Gaming Mice".into(),
            caption: String::new(),
            intro: Some("Mice & more".into()),
            video_url: "https://cdn.example.com/v.mp4".into(),
            thumbnail_url: None,
            keywords: vec![],
            hashtags: vec![],
            products: vec![
                ProductLink {
                    rank: 2,
                    title: "Mouse <Pro>".into(),
                    price: Some("$49.99".into()),
                    url: Some("https://www.amazon.com/dp/B000000002?tag=mytag-20&th=1".into()),
                },
                ProductLink {
                    rank: 1,
                    title: "Mouse Lite".into(),
                    price: None,
                    url: None,
                },
            ],
        }
    }

    #[test]
    fn test_render_post_html() {
        let html = render_post_html(&content());

        assert!(html.starts_with("<p>Mice &amp; more</p>\n<video controls src=\"https://cdn.example.com/v.mp4\">"));
        assert!(html.contains(
            "<li><a href=\"https://www.amazon.com/dp/B000000002?tag=mytag-20&amp;th=1\" rel=\"sponsored nofollow\">Mouse &lt;Pro&gt; ($49.99)</a></li>"
        ));
        assert!(html.contains("<li>Mouse Lite</li>"));
        assert!(html.contains(AFFILIATE_DISCLOSURE));
    }

    #[test]
    fn test_posts_url_trims_slash() {
        let config = WordPressConfig {
            site_url: "https://blog.example.com/".into(),
            username: "editor".into(),
            application_password: "abcd efgh".into(),
            post_status: "draft".into(),
        };
        let connector = WordPressConnector::new(&config, 30).unwrap();
        assert_eq!(connector.posts_url(), "https://blog.example.com/wp-json/wp/v2/posts");
    }

    #[test]
    fn test_rejects_bad_config() {
        let config = WordPressConfig {
            site_url: "not a url".into(),
            username: "editor".into(),
            application_password: "abcd".into(),
            post_status: "publish".into(),
        };
        assert!(matches!(
            WordPressConnector::new(&config, 30),
            Err(SocialError::ValidationError(_))
        ));
    }
}
