//! Pipeline configuration
//!
//! A single JSON document holding every API key and tunable, read once at
//! process start and passed by reference into each component constructor.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utils::text::mask_secret;

use super::llm::ProviderType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Missing required config keys: {}", .0.join(", "))]
    Missing(Vec<String>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub airtable: AirtableConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rainforest: RainforestConfig,
    #[serde(default)]
    pub affiliate: AffiliateConfig,
    #[serde(default)]
    pub images: ImageConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub youtube: Option<YouTubeConfig>,
    #[serde(default)]
    pub tiktok: Option<TikTokConfig>,
    #[serde(default)]
    pub instagram: Option<InstagramConfig>,
    #[serde(default)]
    pub wordpress: Option<WordPressConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_http_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirtableConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_id: String,
    #[serde(default = "default_airtable_table")]
    pub table: String,
    #[serde(default)]
    pub view: Option<String>,
}

impl Default for AirtableConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_id: String::new(),
            table: default_airtable_table(),
            view: None,
        }
    }
}

impl AirtableConfig {
    /// Keys needed to read and write records.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_required(&[
            ("airtable.api_key", &self.api_key),
            ("airtable.base_id", &self.base_id),
            ("airtable.table", &self.table),
        ])
    }
}

fn default_airtable_table() -> String {
    "Videos".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderType,
    #[serde(default)]
    pub api_key: String,
    /// Falls back to the provider's default model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::default(),
            api_key: String::new(),
            model: None,
            endpoint: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RainforestConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_rainforest_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_amazon_domain")]
    pub amazon_domain: String,
    /// Products with fewer reviews never reach ranking.
    #[serde(default = "default_min_reviews")]
    pub min_reviews: u64,
    #[serde(default = "default_product_count")]
    pub product_count: usize,
}

fn default_rainforest_endpoint() -> String {
    "https://api.rainforestapi.com/request".to_string()
}

fn default_amazon_domain() -> String {
    "amazon.com".to_string()
}

fn default_min_reviews() -> u64 {
    100
}

fn default_product_count() -> usize {
    5
}

impl Default for RainforestConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_rainforest_endpoint(),
            amazon_domain: default_amazon_domain(),
            min_reviews: default_min_reviews(),
            product_count: default_product_count(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AffiliateConfig {
    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_image_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_image_model")]
    pub model: String,
    #[serde(default = "default_image_size")]
    pub size: String,
}

fn default_image_endpoint() -> String {
    "https://api.openai.com/v1/images/generations".to_string()
}

fn default_image_model() -> String {
    "dall-e-3".to_string()
}

fn default_image_size() -> String {
    "1024x1792".to_string()
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_image_endpoint(),
            model: default_image_model(),
            size: default_image_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_voice_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_voice_model")]
    pub model_id: String,
}

fn default_voice_endpoint() -> String {
    "https://api.elevenlabs.io/v1".to_string()
}

fn default_voice_id() -> String {
    // ElevenLabs "Rachel"
    "21m00Tcm4TlvDq8ikWAM".to_string()
}

fn default_voice_model() -> String {
    "eleven_multilingual_v2".to_string()
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_voice_endpoint(),
            voice_id: default_voice_id(),
            model_id: default_voice_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_render_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_render_resolution")]
    pub resolution: String,
    #[serde(default = "default_render_quality")]
    pub quality: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

fn default_render_endpoint() -> String {
    "https://api.json2video.com/v2/movies".to_string()
}

fn default_render_resolution() -> String {
    "instagram-story".to_string()
}

fn default_render_quality() -> String {
    "high".to_string()
}

fn default_poll_interval() -> u64 {
    10
}

fn default_max_poll_attempts() -> u32 {
    60
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_render_endpoint(),
            resolution: default_render_resolution(),
            quality: default_render_quality(),
            poll_interval_secs: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// OAuth access token with the `drive.file` scope.
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YouTubeConfig {
    pub access_token: String,
    #[serde(default = "default_privacy_status")]
    pub privacy_status: String,
    #[serde(default = "default_category_id")]
    pub category_id: String,
}

fn default_privacy_status() -> String {
    "public".to_string()
}

fn default_category_id() -> String {
    // Science & Technology
    "28".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TikTokConfig {
    pub access_token: String,
    #[serde(default = "default_tiktok_privacy")]
    pub privacy_level: String,
    /// Account handle, needed to build post URLs.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_tiktok_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_tiktok_poll_attempts")]
    pub max_poll_attempts: u32,
}

fn default_tiktok_privacy() -> String {
    "PUBLIC_TO_EVERYONE".to_string()
}

fn default_tiktok_poll_interval() -> u64 {
    5
}

fn default_tiktok_poll_attempts() -> u32 {
    12
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    pub access_token: String,
    pub account_id: String,
    #[serde(default = "default_instagram_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_instagram_poll_attempts")]
    pub max_poll_attempts: u32,
}

fn default_instagram_poll_interval() -> u64 {
    5
}

fn default_instagram_poll_attempts() -> u32 {
    36
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordPressConfig {
    pub site_url: String,
    pub username: String,
    pub application_password: String,
    #[serde(default = "default_post_status")]
    pub post_status: String,
}

fn default_post_status() -> String {
    "publish".to_string()
}

/// Bounded exponential backoff for transient HTTP failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_times")]
    pub max_times: usize,
    #[serde(default = "default_retry_min_delay")]
    pub min_delay_ms: u64,
    #[serde(default = "default_retry_max_delay")]
    pub max_delay_ms: u64,
}

fn default_retry_times() -> usize {
    3
}

fn default_retry_min_delay() -> u64 {
    1000
}

fn default_retry_max_delay() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_times: default_retry_times(),
            min_delay_ms: default_retry_min_delay(),
            max_delay_ms: default_retry_max_delay(),
        }
    }
}

fn check_required(required: &[(&str, &String)]) -> Result<(), ConfigError> {
    let missing: Vec<String> = required
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| key.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Missing(missing))
    }
}

impl PipelineConfig {
    /// Read and validate the config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the config file without checking for missing keys.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Every key the pipeline cannot run without. Publisher sections are
    /// optional; an absent section disables that publisher.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_required(&[
            ("airtable.api_key", &self.airtable.api_key),
            ("airtable.base_id", &self.airtable.base_id),
            ("airtable.table", &self.airtable.table),
            ("llm.api_key", &self.llm.api_key),
            ("rainforest.api_key", &self.rainforest.api_key),
            ("affiliate.tag", &self.affiliate.tag),
            ("images.api_key", &self.images.api_key),
            ("voice.api_key", &self.voice.api_key),
            ("render.api_key", &self.render.api_key),
            ("storage.access_token", &self.storage.access_token),
        ])
    }

    /// Copy with every secret masked, for display.
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        copy.airtable.api_key = mask_secret(&copy.airtable.api_key);
        copy.llm.api_key = mask_secret(&copy.llm.api_key);
        copy.rainforest.api_key = mask_secret(&copy.rainforest.api_key);
        copy.images.api_key = mask_secret(&copy.images.api_key);
        copy.voice.api_key = mask_secret(&copy.voice.api_key);
        copy.render.api_key = mask_secret(&copy.render.api_key);
        copy.storage.access_token = mask_secret(&copy.storage.access_token);
        if let Some(yt) = copy.youtube.as_mut() {
            yt.access_token = mask_secret(&yt.access_token);
        }
        if let Some(tt) = copy.tiktok.as_mut() {
            tt.access_token = mask_secret(&tt.access_token);
        }
        if let Some(ig) = copy.instagram.as_mut() {
            ig.access_token = mask_secret(&ig.access_token);
        }
        if let Some(wp) = copy.wordpress.as_mut() {
            wp.application_password = mask_secret(&wp.application_password);
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const MINIMAL: &str = r#"{
        "airtable": { "api_key": "patXXXX", "base_id": "appYYY" },
        "llm": { "provider": "anthropic", "api_key": "sk-ant-1234" },
        "rainforest": { "api_key": "rf-key" },
        "affiliate": { "tag": "mytag-20" },
        "images": { "api_key": "sk-img" },
        "voice": { "api_key": "el-key" },
        "render": { "api_key": "j2v-key", "poll_interval_secs": 2 },
        "storage": { "access_token": "ya29.token" },
        "wordpress": {
            "site_url": "https://blog.example.com",
            "username": "editor",
            "application_password": "abcd efgh ijkl"
        }
    }"#;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = PipelineConfig::from_json(MINIMAL).unwrap();

        assert_eq!(config.airtable.table, "Videos");
        assert_eq!(config.llm.provider, ProviderType::Anthropic);
        assert_eq!(config.llm.max_tokens, 2000);
        assert_eq!(config.rainforest.amazon_domain, "amazon.com");
        assert_eq!(config.rainforest.min_reviews, 100);
        assert_eq!(config.render.poll_interval_secs, 2);
        assert_eq!(config.render.max_poll_attempts, 60);
        assert_eq!(config.retry.max_times, 3);
        assert_eq!(config.http_timeout_secs, 60);
        assert!(config.youtube.is_none());
        assert_eq!(config.wordpress.as_ref().unwrap().post_status, "publish");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_lists_missing_keys() {
        let config = PipelineConfig::default();
        let err = config.validate().unwrap_err();

        match err {
            ConfigError::Missing(keys) => {
                assert!(keys.contains(&"airtable.api_key".to_string()));
                assert!(keys.contains(&"affiliate.tag".to_string()));
                assert!(!keys.contains(&"airtable.table".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_airtable_section_validates_alone() {
        let config = PipelineConfig::from_json(
            r#"{"airtable": {"api_key": "patXXXX", "base_id": "appYYY"}}"#,
        )
        .unwrap();
        assert!(config.airtable.validate().is_ok());
        assert!(config.validate().is_err());

        match PipelineConfig::default().airtable.validate().unwrap_err() {
            ConfigError::Missing(keys) => {
                assert_eq!(keys, vec!["airtable.api_key", "airtable.base_id"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.affiliate.tag, "mytag-20");
    }

    #[test]
    fn test_load_missing_file() {
        let err = PipelineConfig::load(Path::new("/nonexistent/countdown.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let err = PipelineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_masked_hides_secrets() {
        let config = PipelineConfig::from_json(MINIMAL).unwrap().masked();
        assert_eq!(config.llm.api_key, "*******1234");
        assert!(!config.storage.access_token.contains("ya29"));
        assert_eq!(config.affiliate.tag, "mytag-20");
        assert!(
            config
                .wordpress
                .unwrap()
                .application_password
                .starts_with('*')
        );
    }
}
