//! Bulk image upload to the gallery API.
//!
//! Each file is one [`WorkItem`]; [`UploadClient::upload`] is the per-item
//! operation and [`upload_batch`] runs a whole directory through a capped
//! pool where one file's failure never affects the others.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::error::ServiceError;
use super::media::mime_for;
use crate::engine::{
    BatchEngine, BatchError, BatchSummary, ConcurrencyPolicy, Failure, FailureMode, WorkItem,
};

/// Supplies the bearer token. Asked once per item, right before the request,
/// so a token refreshed mid-batch is picked up.
pub trait TokenSource: Send + Sync {
    fn current_token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn current_token(&self) -> Option<String> {
        self()
    }
}

/// Body returned by `POST /upload`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    #[serde(default)]
    success: bool,
    r2_path: Option<String>,
    artifact_id: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

/// Result of one successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub file_name: String,
    pub r2_path: String,
    pub artifact_id: Option<String>,
    pub message: Option<String>,
}

impl fmt::Display for UploadReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.r2_path)
    }
}

pub struct UploadClient {
    client: Client,
    endpoint: String,
    tokens: Arc<dyn TokenSource>,
}

impl UploadClient {
    /// `api_base_url` is the API root, e.g. `https://host/api/v1`.
    pub fn new(api_base_url: &str, tokens: Arc<dyn TokenSource>) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/upload", api_base_url.trim_end_matches('/')),
            tokens,
        })
    }

    pub async fn upload(&self, path: &Path) -> Result<UploadReceipt, ServiceError> {
        let token = self
            .tokens
            .current_token()
            .filter(|token| !token.trim().is_empty())
            .ok_or(ServiceError::MissingToken)?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ServiceError::io(path, e))?;
        if bytes.is_empty() {
            return Err(ServiceError::Invalid(format!("{} is empty", path.display())));
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime = mime_for(&file_name);
        debug!(file = %file_name, mime, size = bytes.len(), "uploading");

        let part = Part::bytes(bytes).file_name(file_name.clone()).mime_str(mime)?;
        let form = Form::new()
            .part("imageFile", part)
            .text("fileName", file_name.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                message: error_detail(&text, status),
            });
        }

        let body: UploadResponse = serde_json::from_str(&text)?;
        match (body.success, body.r2_path) {
            (true, Some(r2_path)) => Ok(UploadReceipt {
                file_name,
                r2_path,
                artifact_id: body.artifact_id,
                message: body.message,
            }),
            _ => Err(ServiceError::Status {
                status: status.as_u16(),
                message: body
                    .error
                    .unwrap_or_else(|| "API reported an error".to_string()),
            }),
        }
    }
}

/// Best message for a failed response: JSON `error`, then JSON `message`,
/// then the raw body, then the status reason.
fn error_detail(text: &str, status: reqwest::StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        if let Some(detail) = ["error", "message"]
            .iter()
            .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        {
            return detail.to_string();
        }
        return value.to_string();
    }
    if !text.trim().is_empty() {
        return text.trim().to_string();
    }
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("server error ({})", status.as_u16()))
}

/// Wrap discovered files as work items with generated ids.
pub fn upload_items(paths: Vec<PathBuf>) -> Vec<WorkItem<PathBuf>> {
    paths
        .into_iter()
        .map(|path| WorkItem::new(format!("file-{}", Uuid::new_v4()), path))
        .collect()
}

/// Capped pool with per-item isolation.
pub fn upload_engine(concurrency: usize) -> BatchEngine<UploadReceipt> {
    BatchEngine::new(ConcurrencyPolicy::Capped(concurrency), FailureMode::Isolate)
}

pub async fn upload_batch(
    engine: &mut BatchEngine<UploadReceipt>,
    client: Arc<UploadClient>,
    items: Vec<WorkItem<PathBuf>>,
) -> Result<BatchSummary<UploadReceipt>, BatchError> {
    engine
        .submit(items, move |item| {
            let client = Arc::clone(&client);
            async move { client.upload(item.payload()).await.map_err(Failure::from) }
        })
        .await
}
