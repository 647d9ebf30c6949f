use serde::{Deserialize, Serialize};

use super::outcome::BatchError;

/// How many items may be running at once. Fixed at batch start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// At most `limit` items are running simultaneously; `limit >= 1`.
    Capped(usize),
    /// Every item starts as soon as the batch starts.
    Uncapped,
}

impl ConcurrencyPolicy {
    pub fn validate(self) -> Result<Self, BatchError> {
        match self {
            ConcurrencyPolicy::Capped(0) => Err(BatchError::InvalidConcurrencyLimit),
            policy => Ok(policy),
        }
    }

    /// Number of slots available for a batch of `total` items.
    pub fn slots(self, total: usize) -> usize {
        match self {
            ConcurrencyPolicy::Capped(limit) => limit.min(total),
            ConcurrencyPolicy::Uncapped => total,
        }
    }
}

/// What one item's failure means for the rest of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Failures stay local to their item; every item runs to settlement.
    #[default]
    Isolate,
    /// The first failure stops admission and becomes the batch-level error.
    AbortOnFirstFailure,
}

/// What happens to siblings still running when a batch aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortAction {
    /// Let them finish in the background and discard their outcomes.
    #[default]
    Drain,
    /// Abort their tasks at the next suspension point.
    Cancel,
}
