//! Batch execution engine.
//!
//! Takes an ordered collection of independent [`WorkItem`]s and a per-item
//! operation, runs them under a [`ConcurrencyPolicy`] and a [`FailureMode`],
//! and returns one [`Outcome`] per item in submission order.

mod aggregator;
mod item;
mod outcome;
mod policy;
mod progress;
mod scheduler;

pub use aggregator::{OutcomeAggregator, Verdict};
pub use item::{InvalidTransition, TaskState, WorkItem};
pub use outcome::{BatchError, BatchSummary, Failure, FailureKind, ItemResult, Outcome};
pub use policy::{AbortAction, ConcurrencyPolicy, FailureMode};
pub use progress::{ChannelSink, ProgressEvent, ProgressHandle, ProgressSink, ProgressUpdate};
pub use scheduler::{BatchEngine, submit};
