use std::collections::{HashMap, HashSet};
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt as _};
use tokio::task::{AbortHandle, JoinError};
use tracing::{info, warn};

use super::aggregator::{OutcomeAggregator, Verdict};
use super::item::WorkItem;
use super::outcome::{BatchError, BatchSummary, Failure, Outcome};
use super::policy::{AbortAction, ConcurrencyPolicy, FailureMode};
use super::progress::{ProgressHandle, ProgressSink};

/// Runs batches of independent items under a fixed policy pair.
///
/// Items are admitted strictly in submission order. When every slot is
/// occupied, admission waits for whichever running item settles first, not
/// the oldest one, so completion order is independent of submission order.
/// The summary is always reordered back to submission order.
pub struct BatchEngine<T> {
    policy: ConcurrencyPolicy,
    mode: FailureMode,
    abort_action: AbortAction,
    progress: ProgressHandle,
    sink: Option<Arc<dyn ProgressSink<T>>>,
}

impl<T> BatchEngine<T> {
    pub fn new(policy: ConcurrencyPolicy, mode: FailureMode) -> Self {
        Self {
            policy,
            mode,
            abort_action: AbortAction::default(),
            progress: ProgressHandle::default(),
            sink: None,
        }
    }

    pub fn with_progress_sink(mut self, sink: impl ProgressSink<T> + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn with_abort_action(mut self, action: AbortAction) -> Self {
        self.abort_action = action;
        self
    }

    pub fn policy(&self) -> ConcurrencyPolicy {
        self.policy
    }

    pub fn mode(&self) -> FailureMode {
        self.mode
    }

    /// Counters that can be polled while a batch is running.
    pub fn progress(&self) -> ProgressHandle {
        self.progress.clone()
    }
}

impl<T: Send + 'static> BatchEngine<T> {
    /// Drive every item through QUEUED → RUNNING → SUCCEEDED | FAILED.
    ///
    /// Each admitted operation runs as its own tokio task. An operation that
    /// panics, either while building its future or while running it, settles
    /// as an `Internal` failure, as does a task cancelled by the runtime.
    /// Every other classification is passed through unchanged.
    ///
    /// Takes `&mut self` so one engine drives at most one batch at a time and
    /// its [`ProgressHandle`] always describes that batch.
    pub async fn submit<P, F, Fut>(
        &mut self,
        items: Vec<WorkItem<P>>,
        operation: F,
    ) -> Result<BatchSummary<T>, BatchError>
    where
        P: Send + 'static,
        F: Fn(WorkItem<P>) -> Fut,
        Fut: Future<Output = Result<T, Failure>> + Send + 'static,
    {
        let policy = self.policy.validate()?;
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.id()) {
                return Err(BatchError::DuplicateItemId(item.id().to_string()));
            }
        }

        let ids = items.iter().map(|item| item.id().to_string()).collect();
        let mut aggregator =
            OutcomeAggregator::new(ids, self.mode, self.progress.clone(), self.sink.clone());
        let total = aggregator.total();
        let slots = policy.slots(total);
        info!(total, slots, ?policy, mode = ?self.mode, "starting batch");

        let mut queue = items.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut handles: HashMap<usize, AbortHandle> = HashMap::new();

        loop {
            while !aggregator.is_aborted() && in_flight.len() < slots {
                let Some((index, item)) = queue.next() else {
                    break;
                };
                aggregator.mark_running(index)?;
                let item = item.with_index(index);
                let task = match panic::catch_unwind(AssertUnwindSafe(|| operation(item))) {
                    Ok(future) => tokio::spawn(future),
                    Err(payload) => {
                        let failure = Failure::internal(format!(
                            "operation panicked: {}",
                            panic_message(&*payload)
                        ));
                        tokio::spawn(async move { Err::<T, Failure>(failure) })
                    }
                };
                handles.insert(index, task.abort_handle());
                in_flight.push(async move { (index, task.await) });
            }

            let Some((index, joined)) = in_flight.next().await else {
                break;
            };
            handles.remove(&index);

            let outcome = match joined {
                Ok(result) => Outcome::from(result),
                Err(err) => Outcome::Failure(classify_join_error(err)),
            };
            if aggregator.record(index, outcome)? == Verdict::Abort {
                let abandoned = in_flight.len();
                self.progress.release(abandoned);
                if self.abort_action == AbortAction::Cancel {
                    for handle in handles.values() {
                        handle.abort();
                    }
                }
                warn!(
                    index,
                    abandoned,
                    not_attempted = total - aggregator.attempted(),
                    action = ?self.abort_action,
                    "batch aborted on first failure"
                );
                break;
            }
        }

        let result = aggregator.finish();
        if let Ok(summary) = &result {
            info!(
                total = summary.total,
                succeeded = summary.succeeded,
                failed = summary.failed,
                duration_ms = summary.duration_ms,
                "batch complete"
            );
        }
        result
    }
}

/// Convenience entry point for a one-off batch without a progress sink.
pub async fn submit<P, T, F, Fut>(
    items: Vec<WorkItem<P>>,
    operation: F,
    policy: ConcurrencyPolicy,
    mode: FailureMode,
) -> Result<BatchSummary<T>, BatchError>
where
    P: Send + 'static,
    T: Send + 'static,
    F: Fn(WorkItem<P>) -> Fut,
    Fut: Future<Output = Result<T, Failure>> + Send + 'static,
{
    BatchEngine::new(policy, mode).submit(items, operation).await
}

fn classify_join_error(err: JoinError) -> Failure {
    if !err.is_panic() {
        return Failure::internal("operation was cancelled");
    }
    let payload = err.into_panic();
    Failure::internal(format!(
        "operation panicked: {}",
        panic_message(&*payload)
    ))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::outcome::FailureKind;
    use crate::engine::progress::ProgressEvent;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Notify, oneshot};
    use tokio::time::{sleep, timeout};

    fn items(n: usize) -> Vec<WorkItem<usize>> {
        (0..n).map(|i| WorkItem::new(format!("file-{i}"), i)).collect()
    }

    /// Counts concurrently running operations and remembers the peak.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    async fn gauged(gauge: Arc<Gauge>, delay_ms: u64) {
        gauge.enter();
        sleep(Duration::from_millis(delay_ms)).await;
        gauge.exit();
    }

    #[tokio::test]
    async fn all_succeed_under_capped_pool() {
        let summary = submit(
            items(5),
            |item| async move { Ok(*item.payload() * 10) },
            ConcurrencyPolicy::Capped(2),
            FailureMode::Isolate,
        )
        .await
        .unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed, 0);
        let values: Vec<_> = summary
            .outcomes
            .iter()
            .map(|r| *r.outcome.value().unwrap())
            .collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40]);
        let ids: Vec<_> = summary.outcomes.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["file-0", "file-1", "file-2", "file-3", "file-4"]);
    }

    #[tokio::test]
    async fn isolated_failures_stay_local() {
        let summary = submit(
            items(5),
            |item| async move {
                match *item.payload() {
                    1 | 3 => Err(Failure::remote(502, "resize service unavailable")),
                    n => Ok(n),
                }
            },
            ConcurrencyPolicy::Capped(2),
            FailureMode::Isolate,
        )
        .await
        .unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 2);
        for index in [1, 3] {
            let failure = summary.outcomes[index].outcome.failure().unwrap();
            assert_eq!(failure.kind, FailureKind::Remote);
            assert_eq!(failure.status, Some(502));
        }
        assert!(summary.outcomes[0].outcome.is_success());
        assert!(summary.outcomes[4].outcome.is_success());
    }

    #[tokio::test]
    async fn first_failure_aborts_the_batch() {
        let blocker = Arc::new(Notify::new());
        let op_blocker = Arc::clone(&blocker);
        let result = submit(
            items(3),
            move |item| {
                let blocker = Arc::clone(&op_blocker);
                async move {
                    if *item.payload() == 0 {
                        return Err(Failure::auth("missing credential"));
                    }
                    blocker.notified().await;
                    Ok(())
                }
            },
            ConcurrencyPolicy::Uncapped,
            FailureMode::AbortOnFirstFailure,
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Auth));
        match err {
            BatchError::Aborted {
                item_id,
                not_attempted,
                ..
            } => {
                assert_eq!(item_id, "file-0");
                assert_eq!(not_attempted, 0);
            }
            other => panic!("expected aborted batch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_batch_completes_immediately() {
        let summary = submit(
            Vec::<WorkItem<usize>>::new(),
            |_item| async move { Ok(()) },
            ConcurrencyPolicy::Capped(4),
            FailureMode::AbortOnFirstFailure,
        )
        .await
        .unwrap();

        assert_eq!(summary.total, 0);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 0);
        assert!(summary.outcomes.is_empty());
    }

    #[tokio::test]
    async fn limit_of_one_runs_strictly_sequentially() {
        let gauge = Arc::new(Gauge::default());
        let op_gauge = Arc::clone(&gauge);
        let summary = submit(
            items(6),
            move |_item| {
                let gauge = Arc::clone(&op_gauge);
                async move {
                    gauged(gauge, 5).await;
                    Ok(())
                }
            },
            ConcurrencyPolicy::Capped(1),
            FailureMode::Isolate,
        )
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 6);
        assert_eq!(gauge.peak(), 1);
    }

    #[tokio::test]
    async fn running_count_never_exceeds_limit() {
        let gauge = Arc::new(Gauge::default());
        let op_gauge = Arc::clone(&gauge);
        let summary = submit(
            items(12),
            move |item| {
                let gauge = Arc::clone(&op_gauge);
                async move {
                    gauged(gauge, 2 + (*item.payload() as u64 % 4) * 3).await;
                    Ok(())
                }
            },
            ConcurrencyPolicy::Capped(3),
            FailureMode::Isolate,
        )
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 12);
        assert!(gauge.peak() <= 3, "peak was {}", gauge.peak());
    }

    #[tokio::test]
    async fn output_order_ignores_completion_order() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let op_finished = Arc::clone(&finished);
        let summary = submit(
            items(4),
            move |item| {
                let finished = Arc::clone(&op_finished);
                async move {
                    let n = *item.payload();
                    sleep(Duration::from_millis(40 - n as u64 * 10)).await;
                    finished.lock().unwrap().push(n);
                    Ok(n)
                }
            },
            ConcurrencyPolicy::Uncapped,
            FailureMode::Isolate,
        )
        .await
        .unwrap();

        assert_eq!(*finished.lock().unwrap(), vec![3, 2, 1, 0]);
        let order: Vec<_> = summary.outcomes.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn free_slot_goes_to_next_item_not_oldest() {
        // Item 0 only finishes once item 2 has started, which requires item 1
        // (not item 0) to free its slot first.
        let item_two_started = Arc::new(Notify::new());
        let op_signal = Arc::clone(&item_two_started);
        let run = submit(
            items(3),
            move |item| {
                let signal = Arc::clone(&op_signal);
                async move {
                    match *item.payload() {
                        0 => signal.notified().await,
                        2 => signal.notify_one(),
                        _ => {}
                    }
                    Ok(())
                }
            },
            ConcurrencyPolicy::Capped(2),
            FailureMode::Isolate,
        );

        let summary = timeout(Duration::from_secs(5), run)
            .await
            .expect("admission waited on the oldest item")
            .unwrap();
        assert_eq!(summary.succeeded, 3);
    }

    #[tokio::test]
    async fn classification_is_passed_through() {
        let kinds = [
            FailureKind::Auth,
            FailureKind::Remote,
            FailureKind::Validation,
            FailureKind::Internal,
        ];
        let summary = submit(
            items(4),
            move |item| async move {
                Err::<(), _>(Failure::new(kinds[*item.payload()], "classified"))
            },
            ConcurrencyPolicy::Uncapped,
            FailureMode::Isolate,
        )
        .await
        .unwrap();

        let seen: Vec<_> = summary
            .outcomes
            .iter()
            .map(|r| r.outcome.failure().unwrap().kind)
            .collect();
        assert_eq!(seen, kinds.to_vec());
    }

    #[tokio::test]
    async fn panicking_operation_is_internal_failure() {
        let summary = submit(
            items(3),
            |item| async move {
                if *item.payload() == 1 {
                    panic!("decoder exploded");
                }
                Ok(())
            },
            ConcurrencyPolicy::Capped(2),
            FailureMode::Isolate,
        )
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        let failure = summary.outcomes[1].outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Internal);
        assert!(failure.message.contains("decoder exploded"));
    }

    #[tokio::test]
    async fn panic_before_future_is_built_is_internal_failure() {
        let summary = submit(
            items(3),
            |item: WorkItem<usize>| {
                if *item.payload() == 1 {
                    panic!("bad payload");
                }
                async move { Ok(*item.payload()) }
            },
            ConcurrencyPolicy::Capped(2),
            FailureMode::Isolate,
        )
        .await
        .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.outcomes[0].outcome.value(), Some(&0));
        assert_eq!(summary.outcomes[2].outcome.value(), Some(&2));
        let failure = summary.outcomes[1].outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Internal);
        assert_eq!(failure.message, "operation panicked: bad payload");
    }

    #[tokio::test]
    async fn reused_engine_reports_each_batch_from_zero() {
        let mut engine: BatchEngine<usize> =
            BatchEngine::new(ConcurrencyPolicy::Capped(2), FailureMode::Isolate);
        let progress = engine.progress();

        engine
            .submit(items(3), |item| async move { Ok(*item.payload()) })
            .await
            .unwrap();
        assert_eq!((progress.settled(), progress.total()), (3, 3));

        let watched = progress.clone();
        engine
            .submit(items(1), move |item| {
                let watched = watched.clone();
                async move {
                    assert_eq!(watched.settled(), 0);
                    assert_eq!(watched.running(), 1);
                    Ok(*item.payload())
                }
            })
            .await
            .unwrap();
        assert_eq!(progress.settled(), 1);
        assert_eq!(progress.total(), 1);
        assert_eq!(progress.running(), 0);
    }

    #[tokio::test]
    async fn every_item_failing_still_completes() {
        let summary = submit(
            items(7),
            |_item| async move { Err::<(), _>(Failure::validation("not an image")) },
            ConcurrencyPolicy::Capped(3),
            FailureMode::Isolate,
        )
        .await
        .unwrap();

        assert_eq!(summary.total, 7);
        assert_eq!(summary.failed, 7);
        assert_eq!(summary.succeeded + summary.failed, summary.total);
    }

    #[tokio::test]
    async fn oversized_limit_matches_uncapped() {
        let op = |item: WorkItem<usize>| async move {
            if item.payload() % 3 == 0 {
                Err(Failure::remote(500, "boom"))
            } else {
                Ok(*item.payload())
            }
        };
        let capped = submit(items(9), op, ConcurrencyPolicy::Capped(50), FailureMode::Isolate)
            .await
            .unwrap();
        let uncapped = submit(items(9), op, ConcurrencyPolicy::Uncapped, FailureMode::Isolate)
            .await
            .unwrap();

        assert_eq!(capped.succeeded, uncapped.succeeded);
        assert_eq!(capped.failed, uncapped.failed);
        assert_eq!(capped.outcomes, uncapped.outcomes);
    }

    #[tokio::test]
    async fn abort_stops_admission() {
        let invoked = Arc::new(AtomicUsize::new(0));
        let op_invoked = Arc::clone(&invoked);
        let err = submit(
            items(4),
            move |_item| {
                op_invoked.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(Failure::remote(404, "source image missing")) }
            },
            ConcurrencyPolicy::Capped(1),
            FailureMode::AbortOnFirstFailure,
        )
        .await
        .unwrap_err();

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        match err {
            BatchError::Aborted {
                index,
                total,
                not_attempted,
                failure,
                ..
            } => {
                assert_eq!(index, 0);
                assert_eq!(total, 4);
                assert_eq!(not_attempted, 3);
                assert_eq!(failure.status, Some(404));
            }
            other => panic!("expected aborted batch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drained_siblings_finish_after_abort() {
        let release = Arc::new(Notify::new());
        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = Arc::new(Mutex::new(Some(done_tx)));
        let op_release = Arc::clone(&release);
        let mut engine =
            BatchEngine::new(ConcurrencyPolicy::Uncapped, FailureMode::AbortOnFirstFailure);

        let err = engine
            .submit(items(2), move |item| {
                let release = Arc::clone(&op_release);
                let done_tx = Arc::clone(&done_tx);
                async move {
                    if *item.payload() == 0 {
                        return Err(Failure::internal("disk full"));
                    }
                    release.notified().await;
                    if let Some(tx) = done_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Internal));
        assert_eq!(engine.progress().running(), 0);

        release.notify_one();
        timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("drained sibling never finished")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_siblings_are_dropped() {
        struct DropSignal(Option<oneshot::Sender<()>>);
        impl Drop for DropSignal {
            fn drop(&mut self) {
                if let Some(tx) = self.0.take() {
                    let _ = tx.send(());
                }
            }
        }

        let (dropped_tx, dropped_rx) = oneshot::channel();
        let dropped_tx = Arc::new(Mutex::new(Some(dropped_tx)));
        let mut engine = BatchEngine::new(ConcurrencyPolicy::Uncapped, FailureMode::AbortOnFirstFailure)
            .with_abort_action(AbortAction::Cancel);

        let err = engine
            .submit(items(2), move |item| {
                let sender = if *item.payload() == 1 {
                    dropped_tx.lock().unwrap().take()
                } else {
                    None
                };
                let guard = DropSignal(sender);
                async move {
                    if *item.payload() == 0 {
                        sleep(Duration::from_millis(10)).await;
                        return Err(Failure::remote(500, "boom"));
                    }
                    let _guard = guard;
                    std::future::pending::<()>().await;
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Remote));

        timeout(Duration::from_secs(5), dropped_rx)
            .await
            .expect("cancelled sibling was never dropped")
            .unwrap();
    }

    #[tokio::test]
    async fn progress_is_observable_while_running() {
        let mut engine: BatchEngine<usize> =
            BatchEngine::new(ConcurrencyPolicy::Capped(1), FailureMode::Isolate);
        let progress = engine.progress();
        let summary = engine
            .submit(items(4), move |item| {
                let progress = progress.clone();
                async move {
                    // Sequential execution: everything before this item has settled.
                    assert_eq!(progress.settled(), item.index());
                    assert_eq!(progress.running(), 1);
                    assert_eq!(progress.total(), 4);
                    Ok(progress.settled())
                }
            })
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 4);
        assert!(engine.progress().is_done());
    }

    #[tokio::test]
    async fn sink_receives_one_event_per_item() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let mut engine = BatchEngine::new(ConcurrencyPolicy::Capped(2), FailureMode::Isolate)
            .with_progress_sink(move |event: &ProgressEvent<'_, usize>| {
                sink_events
                    .lock()
                    .unwrap()
                    .push((event.settled, event.total, event.index, event.outcome.is_success()));
            });

        engine
            .submit(items(5), |item| async move {
                if *item.payload() == 2 {
                    Err(Failure::validation("empty file"))
                } else {
                    Ok(*item.payload())
                }
            })
            .await
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 5);
        let settled: Vec<_> = events.iter().map(|e| e.0).collect();
        assert_eq!(settled, vec![1, 2, 3, 4, 5]);
        assert!(events.iter().all(|e| e.1 == 5));
        let mut indices: Vec<_> = events.iter().map(|e| e.2).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(events.iter().any(|e| e.2 == 2 && !e.3));
    }

    #[tokio::test]
    async fn invalid_batches_are_rejected_up_front() {
        let err = submit(
            items(2),
            |_item| async move { Ok(()) },
            ConcurrencyPolicy::Capped(0),
            FailureMode::Isolate,
        )
        .await
        .unwrap_err();
        assert_eq!(err, BatchError::InvalidConcurrencyLimit);

        let duplicated = vec![WorkItem::new("same", 0), WorkItem::new("same", 1)];
        let err = submit(
            duplicated,
            |_item| async move { Ok(()) },
            ConcurrencyPolicy::Uncapped,
            FailureMode::Isolate,
        )
        .await
        .unwrap_err();
        assert_eq!(err, BatchError::DuplicateItemId("same".into()));
    }
}
