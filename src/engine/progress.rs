//! Progress reporting for a running batch.
//!
//! Two views are offered: a push model, where a [`ProgressSink`] receives one
//! [`ProgressEvent`] each time an item settles, and a pull model, where a
//! [`ProgressHandle`] can be polled from another task while the batch runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc::UnboundedSender;

use super::outcome::{Failure, Outcome};

/// Pushed to the sink exactly once per item, at the moment it settles.
#[derive(Debug)]
pub struct ProgressEvent<'a, T> {
    pub settled: usize,
    pub total: usize,
    pub item_id: &'a str,
    pub index: usize,
    pub outcome: &'a Outcome<T>,
}

/// Receives live progress while a batch runs.
pub trait ProgressSink<T>: Send + Sync {
    fn on_settled(&self, event: &ProgressEvent<'_, T>);
}

impl<T, F> ProgressSink<T> for F
where
    F: Fn(&ProgressEvent<'_, T>) + Send + Sync,
{
    fn on_settled(&self, event: &ProgressEvent<'_, T>) {
        self(event)
    }
}

/// Owned copy of a [`ProgressEvent`] suitable for sending across tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub settled: usize,
    pub total: usize,
    pub item_id: String,
    pub index: usize,
    pub failure: Option<Failure>,
}

/// Forwards every event over an unbounded channel. A closed receiver is
/// ignored so the batch never depends on the listener.
pub struct ChannelSink {
    tx: UnboundedSender<ProgressUpdate>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<ProgressUpdate>) -> Self {
        Self { tx }
    }
}

impl<T> ProgressSink<T> for ChannelSink {
    fn on_settled(&self, event: &ProgressEvent<'_, T>) {
        let _ = self.tx.send(ProgressUpdate {
            settled: event.settled,
            total: event.total,
            item_id: event.item_id.to_string(),
            index: event.index,
            failure: event.outcome.failure().cloned(),
        });
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicUsize,
    running: AtomicUsize,
    settled: AtomicUsize,
}

/// Pollable counters for the batch an engine is currently driving.
///
/// Counters restart at zero when the next batch begins.
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    counters: Arc<Counters>,
}

impl ProgressHandle {
    pub fn total(&self) -> usize {
        self.counters.total.load(Ordering::Acquire)
    }

    /// Items the batch is still tracking as running. After an abort the
    /// abandoned siblings are no longer tracked, so this drops to zero even
    /// while drained tasks finish in the background.
    pub fn running(&self) -> usize {
        self.counters.running.load(Ordering::Acquire)
    }

    pub fn settled(&self) -> usize {
        self.counters.settled.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.settled() == self.total()
    }

    pub(crate) fn reset(&self, total: usize) {
        self.counters.settled.store(0, Ordering::Release);
        self.counters.running.store(0, Ordering::Release);
        self.counters.total.store(total, Ordering::Release);
    }

    pub(crate) fn started(&self) {
        self.counters.running.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the new settled count.
    pub(crate) fn settle(&self) -> usize {
        self.release(1);
        self.counters.settled.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Siblings dropped by an abort no longer count as running.
    pub(crate) fn release(&self, count: usize) {
        // Never wraps below zero.
        let _ = self
            .counters
            .running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |running| {
                Some(running.saturating_sub(count))
            });
    }
}
