//! Multi-size renditions through the external resize service.
//!
//! One source image fans out to every requested short-edge size at once.
//! The renditions are all-or-nothing: the first size that fails aborts the
//! batch and is reported as the batch error.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::ServiceError;
use super::media::{rendition_key, rendition_name};
use crate::engine::{
    BatchEngine, BatchError, BatchSummary, ConcurrencyPolicy, Failure, FailureMode, WorkItem,
};

/// Short-edge sizes the resize service is allowed to produce.
pub const ALLOWED_SIZES: &[u32] = &[256, 1024, 2048];

/// One stored rendition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    pub short_size: u32,
    /// Object key, e.g. `1024x/02/00/abc.webp`.
    pub key: String,
    pub url: String,
    pub path: PathBuf,
    pub bytes: usize,
}

impl fmt::Display for Rendition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.key, self.bytes)
    }
}

pub struct ResizeClient {
    client: Client,
    service_url: String,
    public_base_url: String,
    output_dir: PathBuf,
}

impl ResizeClient {
    pub fn new(
        service_url: &str,
        public_base_url: &str,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            service_url: service_url.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            output_dir: output_dir.into(),
        })
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key.trim_start_matches('/'))
    }

    /// Confirm the source image is reachable before fanning out.
    pub async fn check_source(&self, source_path: &str) -> Result<String, ServiceError> {
        let url = self.public_url(source_path);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                message: format!(
                    "Failed to fetch image: {}",
                    status.canonical_reason().unwrap_or("unknown status")
                ),
            });
        }
        Ok(url)
    }

    pub async fn render(
        &self,
        source_url: &str,
        name: &str,
        short_size: u32,
    ) -> Result<Rendition, ServiceError> {
        if !ALLOWED_SIZES.contains(&short_size) {
            return Err(ServiceError::Invalid(format!(
                "invalid short size {short_size}; must be one of {}",
                ALLOWED_SIZES
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let short = short_size.to_string();
        let response = self
            .client
            .get(&self.service_url)
            .query(&[("url", source_url), ("short", short.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                message: format!(
                    "Failed to fetch resized image: {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("")
                )
                .trim_end()
                .to_string(),
            });
        }
        let body = response.bytes().await?;

        let key = rendition_key(short_size, name);
        let path = self.output_dir.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ServiceError::io(parent, e))?;
        }
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| ServiceError::io(&path, e))?;
        debug!(key = %key, bytes = body.len(), "rendition stored");

        Ok(Rendition {
            short_size,
            url: self.public_url(&key),
            key,
            path,
            bytes: body.len(),
        })
    }
}

pub fn resize_items(sizes: &[u32]) -> Vec<WorkItem<u32>> {
    sizes
        .iter()
        .map(|size| WorkItem::new(format!("{size}x"), *size))
        .collect()
}

/// Uncapped fan-out where every rendition must succeed.
pub fn resize_engine() -> BatchEngine<Rendition> {
    BatchEngine::new(ConcurrencyPolicy::Uncapped, FailureMode::AbortOnFirstFailure)
}

pub async fn resize_batch(
    engine: &mut BatchEngine<Rendition>,
    client: Arc<ResizeClient>,
    source_path: &str,
    sizes: &[u32],
) -> Result<BatchSummary<Rendition>, BatchError> {
    let source_url: Arc<str> = client.public_url(source_path).into();
    let name: Arc<str> = rendition_name(source_path).into();
    engine
        .submit(resize_items(sizes), move |item| {
            let client = Arc::clone(&client);
            let source_url = Arc::clone(&source_url);
            let name = Arc::clone(&name);
            async move {
                client
                    .render(&source_url, &name, *item.payload())
                    .await
                    .map_err(Failure::from)
            }
        })
        .await
}
