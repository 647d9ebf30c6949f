use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::item::InvalidTransition;

/// Closed classification attached to every failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A credential needed by the operation was missing or invalid.
    Auth,
    /// The remote counterpart answered with a non-success status.
    Remote,
    /// The item failed a precondition before any remote call was made.
    Validation,
    /// Anything else, including faults the operation did not classify.
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Auth => write!(f, "Auth"),
            FailureKind::Remote => write!(f, "Remote"),
            FailureKind::Validation => write!(f, "Validation"),
            FailureKind::Internal => write!(f, "Internal"),
        }
    }
}

/// A classified failure reported by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// Remote status code, set for `Remote` failures.
    #[serde(rename = "status_code", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} failure (status {status}): {}", self.kind, self.message),
            None => write!(f, "{} failure: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Failure {}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Auth, message)
    }

    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::new(FailureKind::Remote, message)
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}

/// Terminal result of one settled item. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<T> {
    Success { value: T },
    Failure(Failure),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failure(failure) => Some(failure),
            Outcome::Success { .. } => None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Success { value } => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    pub fn into_result(self) -> Result<T, Failure> {
        match self {
            Outcome::Success { value } => Ok(value),
            Outcome::Failure(failure) => Err(failure),
        }
    }
}

impl<T> From<Result<T, Failure>> for Outcome<T> {
    fn from(result: Result<T, Failure>) -> Self {
        match result {
            Ok(value) => Outcome::Success { value },
            Err(failure) => Outcome::Failure(failure),
        }
    }
}

/// An outcome keyed by the item that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult<T> {
    pub id: String,
    pub index: usize,
    pub outcome: Outcome<T>,
}

/// Aggregate over every item of a batch that ran to settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary<T> {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// One entry per item, in submission order.
    pub outcomes: Vec<ItemResult<T>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl<T> BatchSummary<T> {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ItemResult<T>, &Failure)> {
        self.outcomes
            .iter()
            .filter_map(|result| result.outcome.failure().map(|failure| (result, failure)))
    }
}

/// Batch-level errors returned by `submit` in place of a summary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("batch aborted by item {item_id} (#{index}): {failure}; {not_attempted} of {total} items never attempted")]
    Aborted {
        item_id: String,
        index: usize,
        failure: Failure,
        total: usize,
        not_attempted: usize,
    },

    #[error("concurrency limit must be at least 1")]
    InvalidConcurrencyLimit,

    #[error("duplicate item id in batch: {0}")]
    DuplicateItemId(String),

    #[error(transparent)]
    Lifecycle(#[from] InvalidTransition),
}

impl BatchError {
    /// Classification of the triggering failure, for aborted batches.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            BatchError::Aborted { failure, .. } => Some(failure.kind),
            _ => None,
        }
    }
}
