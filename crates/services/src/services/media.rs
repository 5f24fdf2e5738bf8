//! Media Generator: one image and one voice track per countdown slot.
//!
//! Generated assets are copied into cloud storage (provider image URLs
//! expire) and each stored URL is written to the record source as soon as it
//! exists, so a crash halfway through keeps what was already paid for.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use backon::Retryable;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    config::{ImageConfig, RetryConfig},
    http::{self, ErrorClass},
    record_source::RecordStore,
    storage::{StorageClient, StorageError},
    tts::SpeechSynthesizer,
};
use crate::models::record::{Record, RecordUpdate};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} API key not configured")]
    NotConfigured(&'static str),
    #[error("{service} API error ({status}): {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },
    #[error("Media response parse error: {0}")]
    Parse(String),
    #[error("Speech API returned no audio")]
    EmptyAudio,
    #[error("No text to synthesize")]
    EmptyText,
    #[error("Failed to store asset: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to record asset URL: {0}")]
    RecordWrite(String),
    #[error("HTTP request error: {0}")]
    Request(String, ErrorClass),
}

impl MediaError {
    pub fn should_retry(&self) -> bool {
        match self {
            MediaError::Api { status, .. } => ErrorClass::from_status(*status).is_transient(),
            MediaError::Request(_, class) => class.is_transient(),
            MediaError::Storage(e) => e.should_retry(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for MediaError {
    fn from(err: reqwest::Error) -> Self {
        let class = ErrorClass::from_reqwest(&err);
        MediaError::Request(err.to_string(), class)
    }
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Temporary URL of a generated image.
    async fn generate_image(&self, prompt: &str) -> Result<String, MediaError>;
}

/// OpenAI Images API (`/v1/images/generations`).
pub struct OpenAIImageGenerator {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    size: String,
    retry: RetryConfig,
}

impl OpenAIImageGenerator {
    pub fn new(config: &ImageConfig, timeout_secs: u64, retry: RetryConfig) -> Result<Self, MediaError> {
        if config.api_key.trim().is_empty() {
            return Err(MediaError::NotConfigured("OpenAI Images"));
        }
        Ok(Self {
            client: http::build_client(timeout_secs)?,
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            size: config.size.clone(),
            retry,
        })
    }

    async fn generate_once(&self, prompt: &str) -> Result<String, MediaError> {
        let payload = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "size": self.size
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = http::failure_parts(response).await;
            return Err(MediaError::Api {
                service: "OpenAI Images",
                status: status.as_u16(),
                message,
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MediaError::Parse(e.to_string()))?;
        parse_image_url(&body)
    }
}

fn parse_image_url(body: &serde_json::Value) -> Result<String, MediaError> {
    body["data"][0]["url"]
        .as_str()
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or_else(|| MediaError::Parse("no image url in response".to_string()))
}

#[async_trait]
impl ImageGenerator for OpenAIImageGenerator {
    async fn generate_image(&self, prompt: &str) -> Result<String, MediaError> {
        (|| async { self.generate_once(prompt).await })
            .retry(http::backoff(&self.retry))
            .when(MediaError::should_retry)
            .notify(|err: &MediaError, dur: Duration| {
                tracing::warn!(
                    "[MEDIA] Image generation failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    err
                );
            })
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaSlot {
    Intro,
    /// 1-based countdown slot.
    Product(usize),
    Outro,
}

impl fmt::Display for MediaSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSlot::Intro => write!(f, "intro"),
            MediaSlot::Product(slot) => write!(f, "product{slot}"),
            MediaSlot::Outro => write!(f, "outro"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Voice,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Voice => write!(f, "voice"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAsset {
    pub slot: MediaSlot,
    pub kind: MediaKind,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFailure {
    pub slot: MediaSlot,
    pub kind: MediaKind,
    pub error: String,
    pub transient: bool,
}

/// Per-slot outcome of a media batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaReport {
    pub generated: Vec<GeneratedAsset>,
    /// Slots that already had an asset and were left alone.
    pub reused: Vec<(MediaSlot, MediaKind)>,
    pub failures: Vec<MediaFailure>,
}

impl MediaReport {
    /// Nothing usable came out of the batch.
    pub fn is_total_failure(&self) -> bool {
        self.generated.is_empty() && self.reused.is_empty() && !self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} generated, {} reused, {} failed",
            self.generated.len(),
            self.reused.len(),
            self.failures.len()
        )
    }
}

/// One unit of work: which asset, for which slot, from what text.
struct MediaJob {
    slot: MediaSlot,
    kind: MediaKind,
    input: String,
}

pub struct MediaGenerator {
    images: Arc<dyn ImageGenerator>,
    speech: Arc<dyn SpeechSynthesizer>,
    storage: Arc<dyn StorageClient>,
}

impl MediaGenerator {
    pub fn new(
        images: Arc<dyn ImageGenerator>,
        speech: Arc<dyn SpeechSynthesizer>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            images,
            speech,
            storage,
        }
    }

    /// Generate every missing image and voice track for the record. Each
    /// stored URL is written to `store` and merged into `record` right away.
    /// A failing slot is reported and the batch moves on.
    pub async fn generate_all(&self, record: &mut Record, store: &dyn RecordStore) -> MediaReport {
        let mut report = MediaReport::default();

        for job in plan_jobs(record) {
            if current_url(record, job.slot, job.kind).is_some() {
                report.reused.push((job.slot, job.kind));
                continue;
            }

            match self.run_job(record, &job, store).await {
                Ok(url) => {
                    tracing::info!("[MEDIA] {} {} ready: {}", job.slot, job.kind, url);
                    report.generated.push(GeneratedAsset {
                        slot: job.slot,
                        kind: job.kind,
                        url,
                    });
                }
                Err(e) => {
                    tracing::warn!("[MEDIA] {} {} failed: {}", job.slot, job.kind, e);
                    report.failures.push(MediaFailure {
                        slot: job.slot,
                        kind: job.kind,
                        transient: e.should_retry(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("[MEDIA] Record {}: {}", record.id, report.summary());
        report
    }

    async fn run_job(
        &self,
        record: &mut Record,
        job: &MediaJob,
        store: &dyn RecordStore,
    ) -> Result<String, MediaError> {
        let url = match job.kind {
            MediaKind::Image => {
                let temporary = self.images.generate_image(&job.input).await?;
                let name = format!("{}-{}-image.png", record.id, job.slot);
                self.storage
                    .upload_from_url(&name, "image/png", &temporary)
                    .await?
                    .download_url
            }
            MediaKind::Voice => {
                let audio = self.speech.synthesize(&job.input).await?;
                let name = format!("{}-{}-voice.mp3", record.id, job.slot);
                self.storage
                    .upload_bytes(&name, "audio/mpeg", audio)
                    .await?
                    .download_url
            }
        };

        let update = asset_update(job.slot, job.kind, &url);
        store
            .update_record(&record.id, &update)
            .await
            .map_err(|e| MediaError::RecordWrite(e.to_string()))?;
        record.apply(&update);

        Ok(url)
    }
}

/// Jobs in timeline order: intro, products 5 -> 1, outro.
fn plan_jobs(record: &Record) -> Vec<MediaJob> {
    let title = record.display_title();
    let mut jobs = Vec::new();

    jobs.push(MediaJob {
        slot: MediaSlot::Intro,
        kind: MediaKind::Image,
        input: format!(
            "Bold, eye-catching vertical background for a product countdown video titled \"{title}\". \
             No text, no logos."
        ),
    });
    if let Some(text) = record.intro_text.as_deref().filter(|t| !t.trim().is_empty()) {
        jobs.push(MediaJob {
            slot: MediaSlot::Intro,
            kind: MediaKind::Voice,
            input: text.to_string(),
        });
    }

    let mut products: Vec<_> = record.filled_products().collect();
    products.reverse();
    for (slot, product) in products {
        let name = product.title.as_deref().unwrap_or_default();
        jobs.push(MediaJob {
            slot: MediaSlot::Product(slot),
            kind: MediaKind::Image,
            input: format!(
                "Studio product photograph of {name}, clean neutral background, soft lighting, vertical framing."
            ),
        });
        jobs.push(MediaJob {
            slot: MediaSlot::Product(slot),
            kind: MediaKind::Voice,
            input: product_narration(slot, name, product.description.as_deref()),
        });
    }

    jobs.push(MediaJob {
        slot: MediaSlot::Outro,
        kind: MediaKind::Image,
        input: format!(
            "Upbeat closing background for a product countdown video about \"{title}\". No text."
        ),
    });
    if let Some(text) = record.outro_text.as_deref().filter(|t| !t.trim().is_empty()) {
        jobs.push(MediaJob {
            slot: MediaSlot::Outro,
            kind: MediaKind::Voice,
            input: text.to_string(),
        });
    }

    jobs
}

/// Spoken line for one countdown slot.
pub fn product_narration(slot: usize, name: &str, description: Option<&str>) -> String {
    match description.map(str::trim).filter(|d| !d.is_empty()) {
        Some(description) => format!("Number {slot}: {name}. {description}"),
        None => format!("Number {slot}: {name}."),
    }
}

fn current_url(record: &Record, slot: MediaSlot, kind: MediaKind) -> Option<&str> {
    let url = match (slot, kind) {
        (MediaSlot::Intro, MediaKind::Image) => &record.intro_image_url,
        (MediaSlot::Intro, MediaKind::Voice) => &record.intro_voice_url,
        (MediaSlot::Outro, MediaKind::Image) => &record.outro_image_url,
        (MediaSlot::Outro, MediaKind::Voice) => &record.outro_voice_url,
        (MediaSlot::Product(n), MediaKind::Image) => &record.product(n)?.image_url,
        (MediaSlot::Product(n), MediaKind::Voice) => &record.product(n)?.voice_url,
    };
    url.as_deref().filter(|u| !u.is_empty())
}

fn asset_update(slot: MediaSlot, kind: MediaKind, url: &str) -> RecordUpdate {
    let mut update = RecordUpdate::default();
    let url = Some(url.to_string());
    match (slot, kind) {
        (MediaSlot::Intro, MediaKind::Image) => update.intro_image_url = url,
        (MediaSlot::Intro, MediaKind::Voice) => update.intro_voice_url = url,
        (MediaSlot::Outro, MediaKind::Image) => update.outro_image_url = url,
        (MediaSlot::Outro, MediaKind::Voice) => update.outro_voice_url = url,
        (MediaSlot::Product(n), kind) => {
            if let Some(product) = update.product_mut(n) {
                match kind {
                    MediaKind::Image => product.image_url = url,
                    MediaKind::Voice => product.voice_url = url,
                }
            }
        }
    }
    update
}
