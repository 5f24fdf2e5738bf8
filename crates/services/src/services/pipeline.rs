//! Pipeline Orchestrator
//!
//! Runs one record through every stage in a fixed order. Stages never abort
//! the run: each yields a [`StageOutcome`] and the next stage works with
//! whatever the record holds by then. Successful stages write their fields
//! to the record source straight away.

use std::{fmt, sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Instrument, error, info, info_span, warn};

use super::{
    affiliate,
    config::{ConfigError, PipelineConfig},
    content::{ContentGenerator, ContentPart, CountdownScript},
    llm::{self, ProviderError},
    media::{MediaError, MediaGenerator, OpenAIImageGenerator},
    products::{ProductFetcher, ProductSearchError, RainforestClient},
    record_source::{AirtableRecordStore, RecordSourceError, RecordStore},
    social::{self, Publisher, SocialError, SocialPlatform},
    storage::{AssetArchiver, GoogleDriveStorage, StorageClient, StorageError},
    tts::ElevenLabsTTS,
    video::{Json2VideoClient, VideoAssembler, VideoError},
};
use crate::models::{
    product::Product,
    record::{ProductSlot, Record, RecordStatus, RecordUpdate},
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    RecordSource(#[from] RecordSourceError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Products(#[from] ProductSearchError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Social(#[from] SocialError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Content,
    Products,
    Affiliate,
    Media,
    Video,
    Archive,
    Publish(SocialPlatform),
    Status,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Content => "content",
            Stage::Products => "products",
            Stage::Affiliate => "affiliate",
            Stage::Media => "media",
            Stage::Video => "video",
            Stage::Archive => "archive",
            Stage::Publish(platform) => return f.pad(&format!("publish:{platform}")),
            Stage::Status => "status",
        };
        f.pad(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageResult {
    Succeeded(String),
    Skipped(String),
    Failed { error: String, transient: bool },
}

impl StageResult {
    fn failed(error: impl fmt::Display, transient: bool) -> Self {
        StageResult::Failed {
            error: error.to_string(),
            transient,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageResult::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub result: StageResult,
}

/// Everything that happened to one record in one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub record_id: String,
    pub title: String,
    pub status: RecordStatus,
    pub video_url: Option<String>,
    pub stages: Vec<StageOutcome>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn result(&self, stage: Stage) -> Option<&StageResult> {
        self.stages
            .iter()
            .find(|o| o.stage == stage)
            .map(|o| &o.result)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StageOutcome> {
        self.stages.iter().filter(|o| o.result.is_failed())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Record {} \"{}\"", self.record_id, self.title)?;
        for outcome in &self.stages {
            match &outcome.result {
                StageResult::Succeeded(detail) => writeln!(f, "  ok    {:<18} {}", outcome.stage, detail)?,
                StageResult::Skipped(reason) => writeln!(f, "  skip  {:<18} {}", outcome.stage, reason)?,
                StageResult::Failed { error, transient } => writeln!(
                    f,
                    "  FAIL  {:<18} {}{}",
                    outcome.stage,
                    error,
                    if *transient { " (transient)" } else { "" }
                )?,
            }
        }
        write!(
            f,
            "Status: {} in {:.1}s{}",
            self.status,
            self.elapsed_ms as f64 / 1000.0,
            self.video_url
                .as_deref()
                .map(|u| format!(", video {u}"))
                .unwrap_or_default()
        )
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    /// No pending record.
    Idle,
    Processed(RunReport),
}

/// Components the orchestrator drives. Built from config by
/// [`Pipeline::from_config`], or by hand with fakes.
pub struct PipelineParts {
    pub store: Arc<dyn RecordStore>,
    pub content: ContentGenerator,
    pub products: ProductFetcher,
    pub media: MediaGenerator,
    pub video: VideoAssembler,
    pub archiver: AssetArchiver,
    pub publisher: Publisher,
    /// Platforms without a config section, reported as skipped.
    pub disabled_platforms: Vec<SocialPlatform>,
    pub affiliate_tag: String,
    pub product_count: usize,
}

pub struct Pipeline {
    parts: PipelineParts,
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self { parts }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let timeout = config.http_timeout_secs;
        let retry = &config.retry;

        let store = AirtableRecordStore::from_config(&config.airtable, timeout, retry)?;
        let provider = llm::build_provider(&config.llm, timeout)?;
        let search = RainforestClient::new(&config.rainforest, timeout, retry.clone())?;
        let storage: Arc<dyn StorageClient> = Arc::new(GoogleDriveStorage::new(
            &config.storage,
            timeout,
            retry.clone(),
        )?);
        let images = OpenAIImageGenerator::new(&config.images, timeout, retry.clone())?;
        let speech = ElevenLabsTTS::new(&config.voice, timeout, retry.clone())?;
        let render = Json2VideoClient::new(&config.render, timeout, retry.clone())?;
        let (connectors, disabled_platforms) = social::build_connectors(config)?;

        Ok(Self::new(PipelineParts {
            store: Arc::new(store),
            content: ContentGenerator::new(provider, &config.llm, retry.clone()),
            products: ProductFetcher::new(Arc::new(search), config.rainforest.min_reviews),
            media: MediaGenerator::new(Arc::new(images), Arc::new(speech), storage.clone()),
            video: VideoAssembler::new(Arc::new(render), &config.render),
            archiver: AssetArchiver::new(storage),
            publisher: Publisher::new(connectors),
            disabled_platforms,
            affiliate_tag: config.affiliate.tag.clone(),
            product_count: config.rainforest.product_count,
        }))
    }

    /// Process the next pending record, if there is one.
    pub async fn run_once(&self) -> Result<RunOutcome, PipelineError> {
        let Some(record) = self.parts.store.get_pending_record().await? else {
            info!("[PIPELINE] No pending records");
            return Ok(RunOutcome::Idle);
        };
        self.run(record).await.map(RunOutcome::Processed)
    }

    /// Reprocess one record regardless of its status. Stages whose output is
    /// already present are skipped.
    pub async fn run_record(&self, id: &str) -> Result<RunReport, PipelineError> {
        let record = self.parts.store.get_record(id).await?;
        self.run(record).await
    }

    async fn run(&self, record: Record) -> Result<RunReport, PipelineError> {
        let span = info_span!("record", id = %record.id);
        self.process(record).instrument(span).await
    }

    async fn process(&self, mut record: Record) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!("[PIPELINE] Processing '{}'", record.title);

        if let Err(e) = self
            .commit(&mut record, RecordUpdate::status(RecordStatus::Processing))
            .await
        {
            warn!("[PIPELINE] Could not mark {} as processing: {}", record.id, e);
        }

        let mut stages = Vec::new();

        let (result, script) = self.content_stage(&mut record).await;
        self.note(&mut stages, &record, Stage::Content, result).await;

        let result = self.products_stage(&mut record, script).await;
        self.note(&mut stages, &record, Stage::Products, result).await;

        let result = self.affiliate_stage(&mut record).await;
        self.note(&mut stages, &record, Stage::Affiliate, result).await;

        let result = self.media_stage(&mut record).await;
        self.note(&mut stages, &record, Stage::Media, result).await;

        let result = self.video_stage(&mut record).await;
        self.note(&mut stages, &record, Stage::Video, result).await;

        let result = self.archive_stage(&mut record).await;
        self.note(&mut stages, &record, Stage::Archive, result).await;

        for (platform, result) in self.publish_stage(&mut record).await {
            self.note(&mut stages, &record, Stage::Publish(platform), result)
                .await;
        }

        let status = if record.video_url.is_some() {
            RecordStatus::Completed
        } else {
            RecordStatus::Failed
        };
        let result = self.status_stage(&mut record, status, &stages).await;
        stages.push(StageOutcome {
            stage: Stage::Status,
            result,
        });

        let report = RunReport {
            record_id: record.id.clone(),
            title: record.title.clone(),
            status,
            video_url: record.video_url.clone(),
            stages,
            started_at,
            elapsed_ms: clock.elapsed().as_millis() as u64,
        };

        let failures = report.failures().count();
        if failures == 0 {
            info!("[PIPELINE] Record {} finished as {}", record.id, status);
        } else {
            warn!(
                "[PIPELINE] Record {} finished as {} with {} failed stage(s)",
                record.id, status, failures
            );
        }
        Ok(report)
    }

    /// Merge into the in-memory record, then persist.
    async fn commit(&self, record: &mut Record, update: RecordUpdate) -> Result<(), RecordSourceError> {
        record.apply(&update);
        self.parts.store.update_record(&record.id, &update).await?;
        Ok(())
    }

    async fn note(
        &self,
        stages: &mut Vec<StageOutcome>,
        record: &Record,
        stage: Stage,
        result: StageResult,
    ) {
        match &result {
            StageResult::Succeeded(detail) => info!("[PIPELINE] {} ok: {}", stage, detail),
            StageResult::Skipped(reason) => info!("[PIPELINE] {} skipped: {}", stage, reason),
            StageResult::Failed { error, transient } => {
                error!("[PIPELINE] {} failed (transient: {}): {}", stage, transient, error);
                let update = RecordUpdate::error(format!("{stage}: {error}"));
                if let Err(e) = self.parts.store.update_record(&record.id, &update).await {
                    warn!("[PIPELINE] Could not record error for {}: {}", record.id, e);
                }
            }
        }
        stages.push(StageOutcome { stage, result });
    }

    /// Only parts that were generated are written, so failed parts are
    /// retried on the next pass.
    async fn content_stage(&self, record: &mut Record) -> (StageResult, CountdownScript) {
        let has_title = record.optimized_title.is_some();
        let has_narration = record.intro_text.is_some() && record.outro_text.is_some();
        if has_title && has_narration {
            return (
                StageResult::Skipped("content already generated".to_string()),
                CountdownScript::default(),
            );
        }

        let generated = self.parts.content.generate(&record.title).await;

        let mut update = RecordUpdate::default();
        if !has_title && !generated.failed(ContentPart::Title) {
            if !generated.keywords.is_empty() {
                update.keywords = Some(generated.keywords.clone());
            }
            update.optimized_title = Some(generated.optimized_title.clone());
        }
        if !has_narration {
            update.intro_text = generated.intro_text.clone();
            update.outro_text = generated.outro_text.clone();
        }

        if !update.is_empty() {
            if let Err(e) = self.commit(record, update).await {
                return (StageResult::failed(&e, e.should_retry()), generated.script);
            }
        }

        let result = if generated.failures.is_empty() {
            StageResult::Succeeded(format!(
                "{} keywords, title \"{}\"",
                generated.keywords.len(),
                generated.optimized_title
            ))
        } else {
            StageResult::failed(
                generated.failure_summary(),
                generated.failures.iter().any(|f| f.transient),
            )
        };
        (result, generated.script)
    }

    /// Search results first, then the fallback catalog, then the products the
    /// script names.
    async fn products_stage(&self, record: &mut Record, script: CountdownScript) -> StageResult {
        let filled = record.filled_products().count();
        if filled > 0 {
            return StageResult::Skipped(format!("record already has {filled} products"));
        }

        let count = self.parts.product_count.clamp(1, record.products.len());
        let mut source = "search";
        let mut products = self.parts.products.fetch(&record.title, count).await;
        if products.is_empty() {
            products = affiliate::fallback_products(&record.title, count);
            source = "fallback catalog";
        }
        if products.is_empty() {
            products = script_products(&script);
            source = "script";
        }
        if products.is_empty() {
            return StageResult::failed(format!("no products found for '{}'", record.title), false);
        }

        let blurbs = match source {
            "script" => script,
            _ => {
                let written = self
                    .parts
                    .content
                    .generate_script_for(&record.title, &products)
                    .await;
                if written.is_empty() { script } else { written }
            }
        };

        let mut update = RecordUpdate::default();
        for (idx, product) in products.iter().take(count).enumerate() {
            let rank = idx + 1;
            let mut slot = ProductSlot::from_product(product);
            if let Some(entry) = blurbs.entry(rank as u8) {
                if !entry.description.is_empty() {
                    slot.description = Some(entry.description.clone());
                }
            }
            if let Some(target) = update.product_mut(rank) {
                *target = slot;
            }
        }

        match self.commit(record, update).await {
            Ok(()) => StageResult::Succeeded(format!(
                "{} products from {}",
                products.len().min(count),
                source
            )),
            Err(e) => StageResult::failed(&e, e.should_retry()),
        }
    }

    async fn affiliate_stage(&self, record: &mut Record) -> StageResult {
        let mut update = RecordUpdate::default();
        let mut built = 0;
        for (slot, product) in record.filled_products() {
            if product.affiliate_url.is_some() {
                continue;
            }
            let link = affiliate::build_link(&product.to_product(), &self.parts.affiliate_tag);
            if let Some(target) = update.product_mut(slot) {
                target.affiliate_url = Some(link);
                built += 1;
            }
        }

        if built == 0 {
            return StageResult::Skipped("no products without a link".to_string());
        }
        match self.commit(record, update).await {
            Ok(()) => StageResult::Succeeded(format!("{built} links")),
            Err(e) => StageResult::failed(&e, e.should_retry()),
        }
    }

    async fn media_stage(&self, record: &mut Record) -> StageResult {
        let report = self
            .parts
            .media
            .generate_all(record, self.parts.store.as_ref())
            .await;

        if report.is_total_failure() {
            let transient = report.failures.iter().any(|f| f.transient);
            let first = report
                .failures
                .first()
                .map(|f| format!("{} {}: {}", f.slot, f.kind, f.error))
                .unwrap_or_default();
            return StageResult::failed(format!("{} ({})", report.summary(), first), transient);
        }
        if report.generated.is_empty() && report.failures.is_empty() {
            return StageResult::Skipped(format!("all assets present ({})", report.summary()));
        }
        StageResult::Succeeded(report.summary())
    }

    async fn video_stage(&self, record: &mut Record) -> StageResult {
        if let Some(url) = &record.video_url {
            return StageResult::Skipped(format!("already rendered: {url}"));
        }

        match self.parts.video.assemble(record).await {
            Ok(video) => {
                let mut update = RecordUpdate::default();
                update.video_url = Some(video.url.clone());
                match self.commit(record, update).await {
                    Ok(()) => StageResult::Succeeded(format!(
                        "{} after {} checks",
                        video.url, video.polls
                    )),
                    Err(e) => StageResult::failed(
                        format!("rendered {} but could not save it: {}", video.url, e),
                        e.should_retry(),
                    ),
                }
            }
            Err(e) => StageResult::failed(&e, e.should_retry()),
        }
    }

    async fn archive_stage(&self, record: &mut Record) -> StageResult {
        let Some(video_url) = record.video_url.clone() else {
            return StageResult::Skipped("no video".to_string());
        };
        if let Some(url) = &record.drive_url {
            return StageResult::Skipped(format!("already archived: {url}"));
        }

        match self.parts.archiver.archive_video(record, &video_url).await {
            Ok(view_url) => {
                let mut update = RecordUpdate::default();
                update.drive_url = Some(view_url.clone());
                match self.commit(record, update).await {
                    Ok(()) => StageResult::Succeeded(view_url),
                    Err(e) => StageResult::failed(&e, e.should_retry()),
                }
            }
            Err(e) => StageResult::failed(&e, e.should_retry()),
        }
    }

    async fn publish_stage(&self, record: &mut Record) -> Vec<(SocialPlatform, StageResult)> {
        let mut results: Vec<(SocialPlatform, StageResult)> = self
            .parts
            .disabled_platforms
            .iter()
            .map(|p| (*p, StageResult::Skipped("not configured".to_string())))
            .collect();

        if record.video_url.is_none() {
            results.extend(
                self.parts
                    .publisher
                    .platforms()
                    .into_iter()
                    .map(|p| (p, StageResult::Skipped("no video".to_string()))),
            );
            return results;
        }

        let outcomes = self.parts.publisher.publish_all(record).await;
        for platform in self.parts.publisher.platforms() {
            let Some((_, outcome)) = outcomes.iter().find(|(p, _)| *p == platform) else {
                let url = platform.recorded_url(record).unwrap_or_default().to_string();
                results.push((platform, StageResult::Skipped(format!("already published: {url}"))));
                continue;
            };

            let result = match outcome {
                Ok(published) => match &published.platform_url {
                    Some(url) => match self.commit(record, platform.url_update(url)).await {
                        Ok(()) => StageResult::Succeeded(url.clone()),
                        Err(e) => StageResult::failed(
                            format!("published {} but could not save it: {}", url, e),
                            e.should_retry(),
                        ),
                    },
                    None => StageResult::Succeeded(format!(
                        "post {} (no public url)",
                        published.platform_post_id
                    )),
                },
                Err(e) => StageResult::failed(e, e.should_retry()),
            };
            results.push((platform, result));
        }
        results
    }

    async fn status_stage(
        &self,
        record: &mut Record,
        status: RecordStatus,
        stages: &[StageOutcome],
    ) -> StageResult {
        let mut update = RecordUpdate::status(status);
        let any_failed = stages.iter().any(|o| o.result.is_failed());
        match status {
            RecordStatus::Failed if !any_failed => {
                update.last_error = Some("no video was produced".to_string());
            }
            RecordStatus::Completed if !any_failed => update = update.clear_error(),
            _ => {}
        }

        match self.commit(record, update).await {
            Ok(()) => StageResult::Succeeded(status.to_string()),
            Err(e) => StageResult::failed(&e, e.should_retry()),
        }
    }
}

/// Products named by a script, best first. Only title and blurb are known.
fn script_products(script: &CountdownScript) -> Vec<Product> {
    let mut entries: Vec<_> = script.entries.iter().collect();
    entries.sort_by_key(|e| e.rank);
    entries
        .into_iter()
        .map(|e| {
            let mut product = Product::new(e.title.clone());
            if !e.description.is_empty() {
                product.description = Some(e.description.clone());
            }
            product
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::content::ScriptEntry;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Publish(SocialPlatform::TikTok).to_string(), "publish:tiktok");
        assert_eq!(Stage::Archive.to_string(), "archive");
        assert_eq!(format!("{:<10}|", Stage::Video), "video     |");
    }

    #[test]
    fn test_script_products_are_best_first() {
        let script = CountdownScript {
            entries: vec![
                ScriptEntry {
                    rank: 2,
                    title: "Mouse B".into(),
                    description: "Light".into(),
                },
                ScriptEntry {
                    rank: 1,
                    title: "Mouse A".into(),
                    description: String::new(),
                },
            ],
        };

        let products = script_products(&script);
        assert_eq!(products[0].title, "Mouse A");
        assert!(products[0].description.is_none());
        assert_eq!(products[1].description.as_deref(), Some("Light"));
    }

    #[test]
    fn test_report_display() {
        let report = RunReport {
            record_id: "rec1".into(),
            title: "Top 5".into(),
            status: RecordStatus::Failed,
            video_url: None,
            stages: vec![
                StageOutcome {
                    stage: Stage::Video,
                    result: StageResult::failed("render failed", false),
                },
                StageOutcome {
                    stage: Stage::Archive,
                    result: StageResult::Skipped("no video".into()),
                },
            ],
            started_at: Utc::now(),
            elapsed_ms: 1500,
        };

        let text = report.to_string();
        assert!(text.contains("FAIL  video"));
        assert!(text.contains("skip  archive"));
        assert!(text.ends_with("Status: Failed in 1.5s"));
        assert_eq!(report.failures().count(), 1);
        assert!(report.result(Stage::Video).unwrap().is_failed());
    }
}
