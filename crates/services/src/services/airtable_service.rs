use std::time::Duration;

use backon::Retryable;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    config::RetryConfig,
    http::{self, ErrorClass},
};

const AIRTABLE_API_BASE: &str = "https://api.airtable.com/v0";
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum AirtableServiceError {
    #[error("Airtable Personal Access Token not configured")]
    NotConfigured,
    #[error("Airtable authentication failed - invalid token")]
    AuthFailed,
    #[error("Airtable rate limit exceeded")]
    RateLimited,
    #[error("Airtable record not found: {0}")]
    RecordNotFound(String),
    #[error("Airtable table not found: {0}")]
    TableNotFound(String),
    #[error("Airtable API error ({status}): {message}")]
    ApiError { status: u16, message: String },
    #[error("Airtable response parse error: {0}")]
    Parse(String),
    #[error("HTTP request error: {0}")]
    Request(String, ErrorClass),
}

impl AirtableServiceError {
    pub fn should_retry(&self) -> bool {
        match self {
            AirtableServiceError::RateLimited => true,
            AirtableServiceError::ApiError { status, .. } => {
                ErrorClass::from_status(*status).is_transient()
            }
            AirtableServiceError::Request(_, class) => class.is_transient(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AirtableServiceError {
    fn from(err: reqwest::Error) -> Self {
        let class = ErrorClass::from_reqwest(&err);
        AirtableServiceError::Request(err.to_string(), class)
    }
}

/// Record from Airtable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirtableRecord {
    pub id: String,
    pub fields: serde_json::Value,
}

/// One page of a list-records call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsPage {
    pub records: Vec<AirtableRecord>,
    pub offset: Option<String>,
}

/// Query parameters for listing records
#[derive(Debug, Clone, Default)]
pub struct ListRecordsQuery {
    pub filter_by_formula: Option<String>,
    pub view: Option<String>,
    pub offset: Option<String>,
}

impl ListRecordsQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("pageSize", PAGE_SIZE.to_string())];
        if let Some(formula) = &self.filter_by_formula {
            params.push(("filterByFormula", formula.clone()));
        }
        if let Some(view) = &self.view {
            params.push(("view", view.clone()));
        }
        if let Some(offset) = &self.offset {
            params.push(("offset", offset.clone()));
        }
        params
    }
}

#[derive(Debug, Clone)]
pub struct AirtableService {
    client: Client,
    token: String,
    base_url: String,
    retry: RetryConfig,
}

impl AirtableService {
    /// Create a new Airtable service with a Personal Access Token
    pub fn new(
        token: &str,
        timeout_secs: u64,
        retry: RetryConfig,
    ) -> Result<Self, AirtableServiceError> {
        if token.is_empty() {
            return Err(AirtableServiceError::NotConfigured);
        }

        let client = http::build_client(timeout_secs)?;

        Ok(Self {
            client,
            token: token.to_string(),
            base_url: AIRTABLE_API_BASE.to_string(),
            retry,
        })
    }

    /// Point the service at a different API host (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build authorization header value
    fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn table_url(&self, base_id: &str, table: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            base_id,
            urlencoding::encode(table)
        )
    }

    /// Map non-success statuses onto the error taxonomy.
    async fn check(
        response: Response,
        not_found: impl FnOnce() -> AirtableServiceError,
    ) -> Result<Response, AirtableServiceError> {
        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(response),
            401 | 403 => Err(AirtableServiceError::AuthFailed),
            404 => Err(not_found()),
            429 => Err(AirtableServiceError::RateLimited),
            _ => {
                let (_, message) = http::failure_parts(response).await;
                Err(AirtableServiceError::ApiError { status, message })
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, AirtableServiceError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AirtableServiceError>>,
    {
        op.retry(http::backoff(&self.retry))
            .when(|e| e.should_retry())
            .notify(|err: &AirtableServiceError, dur: Duration| {
                tracing::warn!(
                    "Airtable API call failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    err
                );
            })
            .await
    }

    /// Get one page of records from a table
    pub async fn list_records(
        &self,
        base_id: &str,
        table: &str,
        query: &ListRecordsQuery,
    ) -> Result<RecordsPage, AirtableServiceError> {
        self.with_retry(|| async { self.list_records_internal(base_id, table, query).await })
            .await
    }

    async fn list_records_internal(
        &self,
        base_id: &str,
        table: &str,
        query: &ListRecordsQuery,
    ) -> Result<RecordsPage, AirtableServiceError> {
        let response = self
            .client
            .get(self.table_url(base_id, table))
            .header("Authorization", self.auth_header())
            .query(&query.params())
            .send()
            .await?;

        let response =
            Self::check(response, || AirtableServiceError::TableNotFound(table.to_string()))
                .await?;

        response
            .json()
            .await
            .map_err(|e| AirtableServiceError::Parse(e.to_string()))
    }

    /// Get a single record by ID
    pub async fn get_record(
        &self,
        base_id: &str,
        table: &str,
        record_id: &str,
    ) -> Result<AirtableRecord, AirtableServiceError> {
        self.with_retry(|| async {
            let url = format!("{}/{}", self.table_url(base_id, table), record_id);

            let response = self
                .client
                .get(&url)
                .header("Authorization", self.auth_header())
                .send()
                .await?;

            let response = Self::check(response, || {
                AirtableServiceError::RecordNotFound(record_id.to_string())
            })
            .await?;

            response
                .json()
                .await
                .map_err(|e| AirtableServiceError::Parse(e.to_string()))
        })
        .await
    }

    /// Patch a record's fields. `typecast` lets Airtable coerce select
    /// options and numbers from strings.
    pub async fn update_record(
        &self,
        base_id: &str,
        table: &str,
        record_id: &str,
        fields: serde_json::Value,
    ) -> Result<AirtableRecord, AirtableServiceError> {
        let body = serde_json::json!({
            "fields": fields,
            "typecast": true
        });

        self.with_retry(|| async {
            let url = format!("{}/{}", self.table_url(base_id, table), record_id);

            let response = self
                .client
                .patch(&url)
                .header("Authorization", self.auth_header())
                .json(&body)
                .send()
                .await?;

            let response = Self::check(response, || {
                AirtableServiceError::RecordNotFound(record_id.to_string())
            })
            .await?;

            response
                .json()
                .await
                .map_err(|e| AirtableServiceError::Parse(e.to_string()))
        })
        .await
    }
}
