//! Video Assembler: builds a json2video scene graph from the record's media,
//! submits it and polls the render until it settles.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use backon::Retryable;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::sleep;

use super::{
    config::{RenderConfig, RetryConfig},
    http::{self, ErrorClass},
};
use crate::models::record::Record;

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("json2video API key not configured")]
    NotConfigured,
    #[error("Record has no media to build scenes from")]
    NoScenes,
    #[error("Render API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Render request rejected: {0}")]
    Rejected(String),
    #[error("Render response parse error: {0}")]
    Parse(String),
    #[error("Render failed: {0}")]
    RenderFailed(String),
    #[error("Render did not finish after {attempts} status checks")]
    Timeout { attempts: u32 },
    #[error("HTTP request error: {0}")]
    Request(String, ErrorClass),
}

impl VideoError {
    pub fn should_retry(&self) -> bool {
        match self {
            VideoError::Api { status, .. } => ErrorClass::from_status(*status).is_transient(),
            VideoError::Request(_, class) => class.is_transient(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for VideoError {
    fn from(err: reqwest::Error) -> Self {
        let class = ErrorClass::from_reqwest(&err);
        VideoError::Request(err.to_string(), class)
    }
}

/// Movie-level settings for the scene graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSettings {
    pub resolution: String,
    pub quality: String,
}

impl SceneSettings {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            resolution: config.resolution.clone(),
            quality: config.quality.clone(),
        }
    }
}

fn scene(comment: String, image: Option<&str>, voice: Option<&str>, caption: &str) -> Option<Value> {
    if image.is_none() && voice.is_none() {
        return None;
    }

    let mut elements = Vec::new();
    if let Some(src) = image {
        elements.push(json!({
            "type": "image",
            "src": src,
            "zoom": 2,
            "duration": -2
        }));
    }
    if let Some(src) = voice {
        elements.push(json!({
            "type": "audio",
            "src": src,
            "duration": -1
        }));
    }
    elements.push(json!({
        "type": "text",
        "style": "003",
        "text": caption,
        "duration": -2,
        "settings": {
            "font-size": "6vw",
            "vertical-position": "bottom"
        }
    }));

    Some(json!({
        "comment": comment,
        "duration": -1,
        "elements": elements
    }))
}

/// Intro, one scene per product (5 -> 1), outro. A scene needs at least an
/// image or a voice track; slots with neither are left out.
pub fn build_scene_graph(record: &Record, settings: &SceneSettings) -> Value {
    let mut scenes = Vec::new();

    scenes.extend(scene(
        "intro".to_string(),
        record.intro_image_url.as_deref(),
        record.intro_voice_url.as_deref(),
        record.display_title(),
    ));

    let mut products: Vec<_> = record.filled_products().collect();
    products.reverse();
    for (slot, product) in products {
        let name = product.title.as_deref().unwrap_or_default();
        let caption = match product.price.as_deref() {
            Some(price) => format!("#{slot} {name} - {price}"),
            None => format!("#{slot} {name}"),
        };
        scenes.extend(scene(
            format!("product {slot}"),
            product.image_url.as_deref(),
            product.voice_url.as_deref(),
            &caption,
        ));
    }

    scenes.extend(scene(
        "outro".to_string(),
        record
            .outro_image_url
            .as_deref()
            .or(record.intro_image_url.as_deref()),
        record.outro_voice_url.as_deref(),
        "Links in the description",
    ));

    json!({
        "comment": format!("{} ({})", record.display_title(), record.id),
        "resolution": settings.resolution,
        "quality": settings.quality,
        "scenes": scenes
    })
}

pub fn scene_count(graph: &Value) -> usize {
    graph["scenes"].as_array().map_or(0, Vec::len)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenderState {
    /// Queued or rendering; carries the raw status string.
    Pending(String),
    Done,
    Failed(String),
}

impl RenderState {
    pub fn parse(status: &str, message: Option<&str>) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "done" | "finished" | "completed" => RenderState::Done,
            "error" | "failed" => RenderState::Failed(
                message
                    .filter(|m| !m.is_empty())
                    .unwrap_or(status)
                    .to_string(),
            ),
            other => RenderState::Pending(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderStatus {
    pub state: RenderState,
    pub url: Option<String>,
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl RenderStatus {
    /// json2video nests the fields under `movie`; older responses put them
    /// at the top level.
    pub fn from_response(body: &Value) -> Result<Self, VideoError> {
        let movie = match body.get("movie") {
            Some(movie) if movie.is_object() => movie,
            _ => body,
        };
        let status = movie["status"]
            .as_str()
            .ok_or_else(|| VideoError::Parse("missing status".to_string()))?;

        Ok(Self {
            state: RenderState::parse(status, movie["message"].as_str()),
            url: movie["url"]
                .as_str()
                .filter(|u| !u.is_empty())
                .map(str::to_string),
            duration: movie["duration"].as_f64(),
            width: movie["width"].as_u64().map(|w| w as u32),
            height: movie["height"].as_u64().map(|h| h as u32),
        })
    }
}

#[async_trait]
pub trait RenderApi: Send + Sync {
    /// Submit a scene graph; returns the project id.
    async fn submit(&self, movie: &Value) -> Result<String, VideoError>;

    async fn status(&self, project_id: &str) -> Result<RenderStatus, VideoError>;
}

pub struct Json2VideoClient {
    client: Client,
    api_key: String,
    endpoint: String,
    retry: RetryConfig,
}

impl Json2VideoClient {
    pub fn new(config: &RenderConfig, timeout_secs: u64, retry: RetryConfig) -> Result<Self, VideoError> {
        if config.api_key.trim().is_empty() {
            return Err(VideoError::NotConfigured);
        }
        Ok(Self {
            client: http::build_client(timeout_secs)?,
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.clone(),
            retry,
        })
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, VideoError> {
        if !response.status().is_success() {
            let (status, message) = http::failure_parts(response).await;
            return Err(VideoError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| VideoError::Parse(e.to_string()))?;
        if body["success"].as_bool() == Some(false) {
            let message = body["message"].as_str().unwrap_or("unknown error").to_string();
            return Err(VideoError::Rejected(message));
        }
        Ok(body)
    }
}

#[async_trait]
impl RenderApi for Json2VideoClient {
    async fn submit(&self, movie: &Value) -> Result<String, VideoError> {
        let body = (|| async {
            let response = self
                .client
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .json(movie)
                .send()
                .await?;
            Self::read_json(response).await
        })
        .retry(http::backoff(&self.retry))
        .when(VideoError::should_retry)
        .notify(|err: &VideoError, dur: Duration| {
            tracing::warn!(
                "[VIDEO] Render submit failed, retrying after {:.2}s: {}",
                dur.as_secs_f64(),
                err
            );
        })
        .await?;

        body["project"]
            .as_str()
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .ok_or_else(|| VideoError::Parse("missing project id".to_string()))
    }

    async fn status(&self, project_id: &str) -> Result<RenderStatus, VideoError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .query(&[("project", project_id)])
            .send()
            .await?;
        let body = Self::read_json(response).await?;
        RenderStatus::from_response(&body)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedVideo {
    pub project_id: String,
    pub url: String,
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Status checks made, including the final one.
    pub polls: u32,
}

pub struct VideoAssembler {
    api: Arc<dyn RenderApi>,
    settings: SceneSettings,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl VideoAssembler {
    pub fn new(api: Arc<dyn RenderApi>, config: &RenderConfig) -> Self {
        Self {
            api,
            settings: SceneSettings::from_config(config),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_poll_attempts: config.max_poll_attempts.max(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn assemble(&self, record: &Record) -> Result<RenderedVideo, VideoError> {
        let movie = build_scene_graph(record, &self.settings);
        let scenes = scene_count(&movie);
        if scenes == 0 {
            return Err(VideoError::NoScenes);
        }

        let project_id = self.api.submit(&movie).await?;
        tracing::info!(
            "[VIDEO] Submitted {} scenes for {} as project {}",
            scenes,
            record.id,
            project_id
        );

        self.wait_for(&project_id).await
    }

    /// Poll until a terminal state or the attempt budget runs out.
    /// Transient status errors use up an attempt; permanent ones abort.
    pub async fn wait_for(&self, project_id: &str) -> Result<RenderedVideo, VideoError> {
        for attempt in 1..=self.max_poll_attempts {
            sleep(self.poll_interval).await;

            let status = match self.api.status(project_id).await {
                Ok(status) => status,
                Err(e) if e.should_retry() => {
                    tracing::warn!(
                        "[VIDEO] Status check {}/{} for {} failed: {}",
                        attempt,
                        self.max_poll_attempts,
                        project_id,
                        e
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            match status.state {
                RenderState::Done => {
                    let url = status.url.ok_or_else(|| {
                        VideoError::RenderFailed("render finished without a video url".to_string())
                    })?;
                    tracing::info!("[VIDEO] Project {} done after {} checks: {}", project_id, attempt, url);
                    return Ok(RenderedVideo {
                        project_id: project_id.to_string(),
                        url,
                        duration: status.duration,
                        width: status.width,
                        height: status.height,
                        polls: attempt,
                    });
                }
                RenderState::Failed(message) => return Err(VideoError::RenderFailed(message)),
                RenderState::Pending(raw) => {
                    tracing::debug!(
                        "[VIDEO] Project {} is '{}' ({}/{})",
                        project_id,
                        raw,
                        attempt,
                        self.max_poll_attempts
                    );
                }
            }
        }

        Err(VideoError::Timeout {
            attempts: self.max_poll_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::models::record::ProductSlot;

    /// Reports `pending_polls` non-terminal statuses, then `last`.
    struct ScriptedRender {
        pending_polls: u32,
        last: Result<RenderStatus, u16>,
        polls: AtomicU32,
        submitted: std::sync::Mutex<Option<Value>>,
    }

    impl ScriptedRender {
        fn new(pending_polls: u32, last: Result<RenderStatus, u16>) -> Arc<Self> {
            Arc::new(Self {
                pending_polls,
                last,
                polls: AtomicU32::new(0),
                submitted: std::sync::Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl RenderApi for ScriptedRender {
        async fn submit(&self, movie: &Value) -> Result<String, VideoError> {
            *self.submitted.lock().unwrap() = Some(movie.clone());
            Ok("proj-1".into())
        }

        async fn status(&self, _project_id: &str) -> Result<RenderStatus, VideoError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.pending_polls {
                return Ok(status(RenderState::Pending("rendering".into()), None));
            }
            match &self.last {
                Ok(status) => Ok(status.clone()),
                Err(code) => Err(VideoError::Api {
                    status: *code,
                    message: "boom".into(),
                }),
            }
        }
    }

    fn status(state: RenderState, url: Option<&str>) -> RenderStatus {
        RenderStatus {
            state,
            url: url.map(str::to_string),
            duration: Some(42.0),
            width: Some(1080),
            height: Some(1920),
        }
    }

    fn record() -> Record {
        let mut record = Record::new("rec1", "Top 5 Gaming Mice");
        record.intro_image_url = Some("https://img/intro.png".into());
        record.intro_voice_url = Some("https://audio/intro.mp3".into());
        record.outro_voice_url = Some("https://audio/outro.mp3".into());
        for slot in 1..=5 {
            record.products[slot - 1] = ProductSlot {
                title: Some(format!("Mouse {slot}")),
                image_url: Some(format!("https://img/{slot}.png")),
                voice_url: Some(format!("https://audio/{slot}.mp3")),
                ..Default::default()
            };
        }
        record.products[1].price = Some("$49.99".into());
        record
    }

    fn assembler(api: Arc<ScriptedRender>, max_poll_attempts: u32) -> VideoAssembler {
        let config = RenderConfig {
            max_poll_attempts,
            ..Default::default()
        };
        VideoAssembler::new(api, &config).with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_scene_graph_shape() {
        let settings = SceneSettings::from_config(&RenderConfig::default());
        let graph = build_scene_graph(&record(), &settings);

        assert_eq!(graph["resolution"], "instagram-story");
        assert_eq!(scene_count(&graph), 7);

        let comments: Vec<&str> = graph["scenes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["comment"].as_str().unwrap())
            .collect();
        assert_eq!(
            comments,
            vec!["intro", "product 5", "product 4", "product 3", "product 2", "product 1", "outro"]
        );

        let fifth = &graph["scenes"][1]["elements"];
        assert_eq!(fifth[0]["type"], "image");
        assert_eq!(fifth[0]["src"], "https://img/5.png");
        assert_eq!(fifth[1]["type"], "audio");
        assert_eq!(fifth[1]["src"], "https://audio/5.mp3");
        assert_eq!(fifth[2]["text"], "#5 Mouse 5");
        assert_eq!(graph["scenes"][4]["elements"][2]["text"], "#2 Mouse 2 - $49.99");

        // outro borrows the intro image
        assert_eq!(graph["scenes"][6]["elements"][0]["src"], "https://img/intro.png");
    }

    #[test]
    fn test_scene_graph_skips_slots_without_media() {
        let mut record = record();
        record.products[2].image_url = None;
        record.products[2].voice_url = None;
        record.products[4] = ProductSlot::default();

        let graph = build_scene_graph(&record, &SceneSettings::from_config(&RenderConfig::default()));
        assert_eq!(scene_count(&graph), 5);

        let empty = Record::new("rec2", "Nothing yet");
        assert_eq!(
            scene_count(&build_scene_graph(&empty, &SceneSettings::from_config(&RenderConfig::default()))),
            0
        );
    }

    #[test]
    fn test_status_parsing() {
        let nested = json!({
            "success": true,
            "movie": { "status": "done", "url": "https://cdn/out.mp4", "duration": 61.5, "width": 1080, "height": 1920 }
        });
        let status = RenderStatus::from_response(&nested).unwrap();
        assert_eq!(status.state, RenderState::Done);
        assert_eq!(status.url.as_deref(), Some("https://cdn/out.mp4"));
        assert_eq!(status.height, Some(1920));

        let flat = json!({ "status": "error", "message": "Invalid image src" });
        assert_eq!(
            RenderStatus::from_response(&flat).unwrap().state,
            RenderState::Failed("Invalid image src".into())
        );

        assert_eq!(RenderState::parse("Finished", None), RenderState::Done);
        assert_eq!(RenderState::parse("COMPLETED", None), RenderState::Done);
        assert_eq!(RenderState::parse("failed", None), RenderState::Failed("failed".into()));
        assert_eq!(RenderState::parse("running", None), RenderState::Pending("running".into()));
        assert!(RenderStatus::from_response(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_done_after_k_pending_polls() {
        for k in [0, 1, 4] {
            let api = ScriptedRender::new(k, Ok(status(RenderState::Done, Some("https://cdn/out.mp4"))));
            let video = assembler(api.clone(), 10).assemble(&record()).await.unwrap();

            assert_eq!(video.url, "https://cdn/out.mp4");
            assert_eq!(video.polls, k + 1);
            assert_eq!(api.polls.load(Ordering::SeqCst), k + 1);
            assert_eq!(video.project_id, "proj-1");
        }
    }

    #[tokio::test]
    async fn test_timeout_never_exceeds_budget() {
        let api = ScriptedRender::new(u32::MAX, Ok(status(RenderState::Done, Some("x"))));
        let err = assembler(api.clone(), 3).assemble(&record()).await.unwrap_err();

        assert!(matches!(err, VideoError::Timeout { attempts: 3 }));
        assert_eq!(api.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_render_failure_is_distinct_from_timeout() {
        let api = ScriptedRender::new(
            2,
            Ok(status(RenderState::Failed("Invalid audio src".into()), None)),
        );
        let err = assembler(api.clone(), 10).assemble(&record()).await.unwrap_err();
        assert!(matches!(err, VideoError::RenderFailed(ref m) if m == "Invalid audio src"));
        assert_eq!(api.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_done_without_url_is_failure() {
        let api = ScriptedRender::new(0, Ok(status(RenderState::Done, None)));
        let err = assembler(api, 10).assemble(&record()).await.unwrap_err();
        assert!(matches!(err, VideoError::RenderFailed(_)));
    }

    #[tokio::test]
    async fn test_transient_poll_errors_use_attempts() {
        let api = ScriptedRender::new(1, Err(503));
        let err = assembler(api.clone(), 4).assemble(&record()).await.unwrap_err();
        assert!(matches!(err, VideoError::Timeout { attempts: 4 }));
        assert_eq!(api.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_poll_error_aborts() {
        let api = ScriptedRender::new(1, Err(401));
        let err = assembler(api.clone(), 10).assemble(&record()).await.unwrap_err();
        assert!(matches!(err, VideoError::Api { status: 401, .. }));
        assert_eq!(api.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_media_is_not_submitted() {
        let api = ScriptedRender::new(0, Ok(status(RenderState::Done, Some("x"))));
        let err = assembler(api.clone(), 10)
            .assemble(&Record::new("rec9", "Empty"))
            .await
            .unwrap_err();
        assert!(matches!(err, VideoError::NoScenes));
        assert!(api.submitted.lock().unwrap().is_none());
    }
}
