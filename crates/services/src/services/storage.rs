//! Cloud storage: Google Drive uploads and the Asset Archiver stage.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use backon::Retryable;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utils::text::slugify;

use super::{
    config::{RetryConfig, StorageConfig},
    http::{self, ErrorClass},
};
use crate::models::record::Record;

const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage access token not configured")]
    NotConfigured,
    #[error("Storage API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Failed to download {url}: HTTP {status}")]
    Download { url: String, status: u16 },
    #[error("Storage response parse error: {0}")]
    Parse(String),
    #[error("HTTP request error: {0}")]
    Request(String, ErrorClass),
}

impl StorageError {
    pub fn should_retry(&self) -> bool {
        match self {
            StorageError::Api { status, .. } | StorageError::Download { status, .. } => {
                ErrorClass::from_status(*status).is_transient()
            }
            StorageError::Request(_, class) => class.is_transient(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        let class = ErrorClass::from_reqwest(&err);
        StorageError::Request(err.to_string(), class)
    }
}

/// An uploaded file. `download_url` streams the raw bytes and is what
/// renderers and publishers should fetch; `view_url` is for humans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: String,
    pub name: String,
    pub view_url: String,
    pub download_url: String,
}

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn upload_bytes(
        &self,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredObject, StorageError>;

    async fn upload_from_url(
        &self,
        name: &str,
        mime_type: &str,
        url: &str,
    ) -> Result<StoredObject, StorageError>;
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
}

pub struct GoogleDriveStorage {
    client: Client,
    access_token: String,
    folder_id: Option<String>,
    upload_base: String,
    api_base: String,
    retry: RetryConfig,
}

impl GoogleDriveStorage {
    pub fn new(
        config: &StorageConfig,
        timeout_secs: u64,
        retry: RetryConfig,
    ) -> Result<Self, StorageError> {
        if config.access_token.trim().is_empty() {
            return Err(StorageError::NotConfigured);
        }
        Ok(Self {
            client: http::build_client(timeout_secs)?,
            access_token: config.access_token.clone(),
            folder_id: config.folder_id.clone().filter(|f| !f.trim().is_empty()),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
            api_base: DRIVE_API_BASE.to_string(),
            retry,
        })
    }

    pub fn view_url(file_id: &str) -> String {
        format!("https://drive.google.com/file/d/{file_id}/view")
    }

    pub fn download_url(file_id: &str) -> String {
        format!("https://drive.google.com/uc?export=download&id={file_id}")
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let (status, message) = http::failure_parts(response).await;
        Err(StorageError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn retrying<T, F, Fut>(&self, what: &str, op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StorageError>>,
    {
        op.retry(http::backoff(&self.retry))
            .when(StorageError::should_retry)
            .notify(|err: &StorageError, dur: Duration| {
                tracing::warn!(
                    "[STORAGE] {} failed, retrying after {:.2}s: {}",
                    what,
                    dur.as_secs_f64(),
                    err
                );
            })
            .await
    }

    /// Simple media upload; the file is created untitled at the Drive root.
    async fn create_file(&self, mime_type: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let url = format!("{}/files?uploadType=media", self.upload_base);
        self.retrying("Drive upload", || async {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.access_token)
                .header(reqwest::header::CONTENT_TYPE, mime_type)
                .body(bytes.to_vec())
                .send()
                .await?;
            let file: DriveFile = Self::ensure_success(response)
                .await?
                .json()
                .await
                .map_err(|e| StorageError::Parse(e.to_string()))?;
            Ok(file.id)
        })
        .await
    }

    /// Set the file name and move it into the configured folder.
    async fn update_metadata(&self, file_id: &str, name: &str) -> Result<(), StorageError> {
        let url = format!("{}/files/{}", self.api_base, file_id);
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(folder) = &self.folder_id {
            query.push(("addParents", folder.as_str()));
        }

        self.retrying("Drive metadata update", || async {
            let response = self
                .client
                .patch(&url)
                .bearer_auth(&self.access_token)
                .query(&query)
                .json(&serde_json::json!({ "name": name }))
                .send()
                .await?;
            Self::ensure_success(response).await.map(|_| ())
        })
        .await
    }

    /// Anyone with the link can read.
    async fn share_publicly(&self, file_id: &str) -> Result<(), StorageError> {
        let url = format!("{}/files/{}/permissions", self.api_base, file_id);
        self.retrying("Drive permission update", || async {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.access_token)
                .json(&serde_json::json!({ "role": "reader", "type": "anyone" }))
                .send()
                .await?;
            Self::ensure_success(response).await.map(|_| ())
        })
        .await
    }
}

#[async_trait]
impl StorageClient for GoogleDriveStorage {
    async fn upload_bytes(
        &self,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredObject, StorageError> {
        let id = self.create_file(mime_type, &bytes).await?;
        self.update_metadata(&id, name).await?;
        self.share_publicly(&id).await?;

        tracing::info!("[STORAGE] Uploaded {} ({} bytes) as {}", name, bytes.len(), id);

        Ok(StoredObject {
            view_url: Self::view_url(&id),
            download_url: Self::download_url(&id),
            name: name.to_string(),
            id,
        })
    }

    async fn upload_from_url(
        &self,
        name: &str,
        mime_type: &str,
        url: &str,
    ) -> Result<StoredObject, StorageError> {
        let bytes = self
            .retrying("Source download", || async {
                let response = self.client.get(url).send().await?;
                if !response.status().is_success() {
                    return Err(StorageError::Download {
                        url: url.to_string(),
                        status: response.status().as_u16(),
                    });
                }
                Ok(response.bytes().await?.to_vec())
            })
            .await?;

        tracing::debug!("[STORAGE] Downloaded {} bytes from {}", bytes.len(), url);
        self.upload_bytes(name, mime_type, bytes).await
    }
}

/// File name for an archived video: `<title-slug>-<record-id>.mp4`.
pub fn video_file_name(record: &Record) -> String {
    let slug = slugify(record.display_title());
    let slug = if slug.is_empty() { "video".to_string() } else { slug };
    let slug: String = slug.chars().take(80).collect();
    format!("{}-{}.mp4", slug.trim_end_matches('-'), record.id)
}

/// Asset Archiver: copies the rendered video into cloud storage.
pub struct AssetArchiver {
    storage: Arc<dyn StorageClient>,
}

impl AssetArchiver {
    pub fn new(storage: Arc<dyn StorageClient>) -> Self {
        Self { storage }
    }

    /// Shareable URL of the archived copy.
    pub async fn archive_video(&self, record: &Record, video_url: &str) -> Result<String, StorageError> {
        let name = video_file_name(record);
        let stored = self
            .storage
            .upload_from_url(&name, "video/mp4", video_url)
            .await?;
        tracing::info!("[ARCHIVE] Archived video for {} as {}", record.id, stored.view_url);
        Ok(stored.view_url)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingStorage {
        calls: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl StorageClient for RecordingStorage {
        async fn upload_bytes(
            &self,
            name: &str,
            _mime_type: &str,
            _bytes: Vec<u8>,
        ) -> Result<StoredObject, StorageError> {
            Err(StorageError::Api {
                status: 500,
                message: format!("unexpected upload of {name}"),
            })
        }

        async fn upload_from_url(
            &self,
            name: &str,
            mime_type: &str,
            url: &str,
        ) -> Result<StoredObject, StorageError> {
            self.calls
                .lock()
                .await
                .push((name.to_string(), mime_type.to_string(), url.to_string()));
            Ok(StoredObject {
                id: "file123".into(),
                name: name.to_string(),
                view_url: GoogleDriveStorage::view_url("file123"),
                download_url: GoogleDriveStorage::download_url("file123"),
            })
        }
    }

    #[test]
    fn test_video_file_name_uses_optimized_title() {
        let mut record = Record::new("rec42", "Top 5 Gaming Mice");
        assert_eq!(video_file_name(&record), "top-5-gaming-mice-rec42.mp4");

        record.optimized_title = Some("Best Gaming Mice (2025)!".into());
        assert_eq!(video_file_name(&record), "best-gaming-mice-2025-rec42.mp4");

        let record = Record::new("rec1", "???");
        assert_eq!(video_file_name(&record), "video-rec1.mp4");
    }

    #[test]
    fn test_drive_urls() {
        assert_eq!(
            GoogleDriveStorage::view_url("abc"),
            "https://drive.google.com/file/d/abc/view"
        );
        assert!(GoogleDriveStorage::download_url("abc").ends_with("id=abc"));
    }

    #[test]
    fn test_error_classification() {
        assert!(StorageError::Api { status: 503, message: String::new() }.should_retry());
        assert!(!StorageError::Api { status: 403, message: String::new() }.should_retry());
        assert!(!StorageError::Download { url: "u".into(), status: 404 }.should_retry());
        assert!(!StorageError::NotConfigured.should_retry());
    }

    #[test]
    fn test_drive_requires_token() {
        let result = GoogleDriveStorage::new(&StorageConfig::default(), 30, RetryConfig::default());
        assert!(matches!(result, Err(StorageError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_archive_video() {
        let storage = Arc::new(RecordingStorage::default());
        let archiver = AssetArchiver::new(storage.clone());
        let record = Record::new("rec1", "Top 5 Gaming Mice");

        let url = archiver
            .archive_video(&record, "https://cdn.json2video.com/out.mp4")
            .await
            .unwrap();

        assert_eq!(url, "https://drive.google.com/file/d/file123/view");
        let calls = storage.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "top-5-gaming-mice-rec1.mp4");
        assert_eq!(calls[0].1, "video/mp4");
    }
}
