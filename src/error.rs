use std::path::PathBuf;

use thiserror::Error;

use crate::engine::BatchError;
use crate::service::ServiceError;

#[derive(Debug, Error)]
pub enum PixbatchError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("No images found under {}", .0.display())]
    NoImages(PathBuf),

    #[error("{failed} of {total} items failed")]
    ItemsFailed { failed: usize, total: usize },

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
