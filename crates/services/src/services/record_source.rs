//! Record Source: where pending work comes from and where results go back.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use super::{
    airtable_service::{AirtableService, AirtableServiceError, ListRecordsQuery},
    config::{AirtableConfig, RetryConfig},
};
use crate::models::record::{Record, RecordUpdate};

/// Rows with a title, no video and a blank or `Pending` status.
const PENDING_FORMULA: &str =
    "AND(OR({Status} = 'Pending', {Status} = BLANK()), {Title} != '', {VideoURL} = BLANK())";

#[derive(Debug, Error)]
pub enum RecordSourceError {
    #[error(transparent)]
    Airtable(#[from] AirtableServiceError),
    #[error("Record not found: {0}")]
    NotFound(String),
}

impl RecordSourceError {
    pub fn should_retry(&self) -> bool {
        match self {
            RecordSourceError::Airtable(e) => e.should_retry(),
            RecordSourceError::NotFound(_) => false,
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// First pending record, or `None` when the queue is empty.
    async fn get_pending_record(&self) -> Result<Option<Record>, RecordSourceError>;

    async fn get_record(&self, id: &str) -> Result<Record, RecordSourceError>;

    /// Write a partial update. Returns `false` when there was nothing to write.
    async fn update_record(
        &self,
        id: &str,
        update: &RecordUpdate,
    ) -> Result<bool, RecordSourceError>;
}

/// Airtable-backed record store.
pub struct AirtableRecordStore {
    service: AirtableService,
    base_id: String,
    table: String,
    view: Option<String>,
}

impl AirtableRecordStore {
    pub fn new(service: AirtableService, config: &AirtableConfig) -> Self {
        Self {
            service,
            base_id: config.base_id.clone(),
            table: config.table.clone(),
            view: config.view.clone(),
        }
    }

    pub fn from_config(
        config: &AirtableConfig,
        timeout_secs: u64,
        retry: &RetryConfig,
    ) -> Result<Self, RecordSourceError> {
        let service = AirtableService::new(&config.api_key, timeout_secs, retry.clone())?;
        Ok(Self::new(service, config))
    }
}

#[async_trait]
impl RecordStore for AirtableRecordStore {
    async fn get_pending_record(&self) -> Result<Option<Record>, RecordSourceError> {
        let mut query = ListRecordsQuery {
            filter_by_formula: Some(PENDING_FORMULA.to_string()),
            view: self.view.clone(),
            offset: None,
        };
        let mut pages = 0;

        loop {
            let page = self
                .service
                .list_records(&self.base_id, &self.table, &query)
                .await?;
            pages += 1;

            let found = page
                .records
                .iter()
                .map(|raw| Record::from_fields(raw.id.clone(), &raw.fields))
                .find(Record::is_pending);

            if let Some(record) = found {
                tracing::debug!("[AIRTABLE] Pending record {} found on page {}", record.id, pages);
                return Ok(Some(record));
            }

            match page.offset {
                Some(offset) => query.offset = Some(offset),
                None => {
                    tracing::debug!("[AIRTABLE] No pending records after {} page(s)", pages);
                    return Ok(None);
                }
            }
        }
    }

    async fn get_record(&self, id: &str) -> Result<Record, RecordSourceError> {
        let raw = self
            .service
            .get_record(&self.base_id, &self.table, id)
            .await
            .map_err(|e| match e {
                AirtableServiceError::RecordNotFound(id) => RecordSourceError::NotFound(id),
                other => other.into(),
            })?;
        Ok(Record::from_fields(raw.id, &raw.fields))
    }

    async fn update_record(
        &self,
        id: &str,
        update: &RecordUpdate,
    ) -> Result<bool, RecordSourceError> {
        let fields = update.to_fields();
        if fields.is_empty() {
            return Ok(false);
        }

        let keys: Vec<&String> = fields.keys().collect();
        tracing::debug!("[AIRTABLE] Updating {} fields on {}: {:?}", keys.len(), id, keys);

        self.service
            .update_record(
                &self.base_id,
                &self.table,
                id,
                serde_json::Value::Object(fields),
            )
            .await?;
        Ok(true)
    }
}

/// In-process record store. Keeps every applied update for inspection.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<Vec<Record>>,
    updates: Mutex<Vec<(String, RecordUpdate)>>,
}

impl InMemoryRecordStore {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: Mutex::new(records),
            updates: Mutex::new(Vec::new()),
        }
    }

    /// Current state of a record.
    pub async fn snapshot(&self, id: &str) -> Option<Record> {
        self.records.lock().await.iter().find(|r| r.id == id).cloned()
    }

    /// Every update written so far, in order.
    pub async fn updates(&self) -> Vec<(String, RecordUpdate)> {
        self.updates.lock().await.clone()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_pending_record(&self) -> Result<Option<Record>, RecordSourceError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .find(|r| r.is_pending())
            .cloned())
    }

    async fn get_record(&self, id: &str) -> Result<Record, RecordSourceError> {
        self.snapshot(id)
            .await
            .ok_or_else(|| RecordSourceError::NotFound(id.to_string()))
    }

    async fn update_record(
        &self,
        id: &str,
        update: &RecordUpdate,
    ) -> Result<bool, RecordSourceError> {
        if update.is_empty() {
            return Ok(false);
        }

        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| RecordSourceError::NotFound(id.to_string()))?;
        record.apply(update);
        drop(records);

        self.updates.lock().await.push((id.to_string(), update.clone()));
        Ok(true)
    }
}
