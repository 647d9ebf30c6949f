use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::item::{InvalidTransition, TaskState};
use super::outcome::{BatchError, BatchSummary, Failure, ItemResult, Outcome};
use super::policy::FailureMode;
use super::progress::{ProgressEvent, ProgressHandle, ProgressSink};

/// What the scheduler should do after an outcome is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// Stop admitting items; the batch has been aborted.
    Abort,
}

/// Collects the terminal outcome of every item of one batch.
///
/// Owned by the scheduler loop, so every mutation is confined to a single
/// task. The [`ProgressHandle`] atomics only mirror state for outside readers.
pub struct OutcomeAggregator<T> {
    mode: FailureMode,
    ids: Vec<String>,
    states: Vec<TaskState>,
    outcomes: Vec<Option<Outcome<T>>>,
    succeeded: usize,
    failed: usize,
    // Index of the item whose failure aborted the batch.
    trigger: Option<usize>,
    progress: ProgressHandle,
    sink: Option<Arc<dyn ProgressSink<T>>>,
    started_at: DateTime<Utc>,
}

impl<T> OutcomeAggregator<T> {
    pub fn new(
        ids: Vec<String>,
        mode: FailureMode,
        progress: ProgressHandle,
        sink: Option<Arc<dyn ProgressSink<T>>>,
    ) -> Self {
        let total = ids.len();
        progress.reset(total);
        Self {
            mode,
            states: vec![TaskState::Queued; total],
            outcomes: (0..total).map(|_| None).collect(),
            ids,
            succeeded: 0,
            failed: 0,
            trigger: None,
            progress,
            sink,
            started_at: Utc::now(),
        }
    }

    pub fn total(&self) -> usize {
        self.ids.len()
    }

    pub fn state(&self, index: usize) -> Option<TaskState> {
        self.states.get(index).copied()
    }

    pub fn is_aborted(&self) -> bool {
        self.trigger.is_some()
    }

    /// Items that were admitted at all, settled or not.
    pub fn attempted(&self) -> usize {
        self.states
            .iter()
            .filter(|state| **state != TaskState::Queued)
            .count()
    }

    pub fn mark_running(&mut self, index: usize) -> Result<(), InvalidTransition> {
        self.states[index].advance(TaskState::Running)?;
        self.progress.started();
        debug!(item_id = %self.ids[index], index, "item running");
        Ok(())
    }

    pub fn record(&mut self, index: usize, outcome: Outcome<T>) -> Result<Verdict, InvalidTransition> {
        if self.trigger.is_some() {
            debug!(item_id = %self.ids[index], index, "discarding outcome after abort");
            return Ok(Verdict::Abort);
        }

        let next = if outcome.is_success() {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        self.states[index].advance(next)?;

        let settled = self.progress.settle();
        if let Some(sink) = &self.sink {
            sink.on_settled(&ProgressEvent {
                settled,
                total: self.total(),
                item_id: &self.ids[index],
                index,
                outcome: &outcome,
            });
        }

        let verdict = match outcome.failure() {
            None => {
                self.succeeded += 1;
                Verdict::Continue
            }
            Some(failure) => {
                self.failed += 1;
                warn!(item_id = %self.ids[index], index, kind = %failure.kind, error = %failure.message, "item failed");
                match self.mode {
                    FailureMode::Isolate => Verdict::Continue,
                    FailureMode::AbortOnFirstFailure => {
                        self.trigger = Some(index);
                        Verdict::Abort
                    }
                }
            }
        };
        self.outcomes[index] = Some(outcome);
        Ok(verdict)
    }

    /// Produce the summary, or the batch-level error for an aborted batch.
    pub fn finish(self) -> Result<BatchSummary<T>, BatchError> {
        if let Some(index) = self.trigger {
            let not_attempted = self.total() - self.attempted();
            let failure = match &self.outcomes[index] {
                Some(Outcome::Failure(failure)) => failure.clone(),
                _ => Failure::internal("aborting item has no recorded failure"),
            };
            return Err(BatchError::Aborted {
                item_id: self.ids[index].clone(),
                index,
                failure,
                total: self.total(),
                not_attempted,
            });
        }

        let finished_at = Utc::now();
        let total = self.total();
        let mut failed = self.failed;
        let outcomes = self
            .ids
            .into_iter()
            .zip(self.outcomes)
            .enumerate()
            .map(|(index, (id, outcome))| {
                let outcome = outcome.unwrap_or_else(|| {
                    failed += 1;
                    Outcome::Failure(Failure::internal("item never settled"))
                });
                ItemResult { id, index, outcome }
            })
            .collect();

        Ok(BatchSummary {
            total,
            succeeded: self.succeeded,
            failed,
            outcomes,
            started_at: self.started_at,
            finished_at,
            duration_ms: (finished_at - self.started_at).num_milliseconds(),
        })
    }
}
