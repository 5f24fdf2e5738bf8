//! ElevenLabs text-to-speech

use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use reqwest::Client;

use super::{
    config::{RetryConfig, VoiceConfig},
    http,
    media::MediaError,
};

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// MP3 bytes for the narration text.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, MediaError>;
}

pub struct ElevenLabsTTS {
    client: Client,
    api_key: String,
    endpoint: String,
    voice_id: String,
    model_id: String,
    retry: RetryConfig,
}

impl ElevenLabsTTS {
    pub fn new(config: &VoiceConfig, timeout_secs: u64, retry: RetryConfig) -> Result<Self, MediaError> {
        if config.api_key.trim().is_empty() {
            return Err(MediaError::NotConfigured("ElevenLabs"));
        }
        Ok(Self {
            client: http::build_client(timeout_secs)?,
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            voice_id: config.voice_id.clone(),
            model_id: config.model_id.clone(),
            retry,
        })
    }

    fn payload(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "text": text,
            "model_id": self.model_id,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.8,
                "style": 0.5,
                "use_speaker_boost": true
            }
        })
    }

    async fn synthesize_once(&self, text: &str) -> Result<Vec<u8>, MediaError> {
        let response = self
            .client
            .post(format!("{}/text-to-speech/{}", self.endpoint, self.voice_id))
            .header("Accept", "audio/mpeg")
            .header("xi-api-key", &self.api_key)
            .json(&self.payload(text))
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = http::failure_parts(response).await;
            return Err(MediaError::Api {
                service: "ElevenLabs",
                status: status.as_u16(),
                message,
            });
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(MediaError::EmptyAudio);
        }
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsTTS {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, MediaError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MediaError::EmptyText);
        }

        tracing::debug!("[TTS] Synthesizing {} chars with voice {}", text.len(), self.voice_id);

        (|| async { self.synthesize_once(text).await })
            .retry(http::backoff(&self.retry))
            .when(MediaError::should_retry)
            .notify(|err: &MediaError, dur: Duration| {
                tracing::warn!(
                    "[TTS] ElevenLabs call failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    err
                );
            })
            .await
    }
}
