//! # Ingestion Loop
//!
//! Long-polls the [`UpdateSource`], hands every update to the
//! [`EventProcessor`] and persists the stream cursor.
//!
//! ```text
//! Stopped ──run()──▶ Running ──stop()──▶ Stopped
//!                       │
//!                       └──fatal error──▶ Fatal ──run()──▶ Running
//! ```
//!
//! The cursor only moves past an update once the executor accepted it (or a
//! pre-interceptor dropped it), and is persisted once per fully accepted
//! batch. A crash therefore re-fetches at most the last unacknowledged batch.
//!
//! | Failure | Reaction |
//! |---------|----------|
//! | network error, timeout | exponential backoff, same fetch again |
//! | unauthorized, conflict | [`IngestionState::Fatal`], `run` returns |
//! | other remote error | server `retry_after` or a fixed delay, same fetch again |
//! | saturated lane | short fixed delay, same update again |

use crate::config::IngestionConfig;
use crate::processor::EventProcessor;
use ferrogram_core::{
    CursorStore, FetchError, FetchRequest, IngestionError, SubmitError, Update, UpdateSource,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Lifecycle state of an [`IngestionLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionState {
    Stopped,
    Running,
    /// Halted by a fatal remote error; `run` may be called again.
    Fatal,
}

/// The long-poll intake loop.
pub struct IngestionLoop {
    source: Arc<dyn UpdateSource>,
    store: Arc<dyn CursorStore>,
    processor: Arc<EventProcessor>,
    config: IngestionConfig,
    state: watch::Sender<IngestionState>,
    stop: watch::Sender<bool>,
    cursor: AtomicI64,
}

impl IngestionLoop {
    pub fn new(
        source: Arc<dyn UpdateSource>,
        store: Arc<dyn CursorStore>,
        processor: Arc<EventProcessor>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            source,
            store,
            processor,
            config,
            state: watch::channel(IngestionState::Stopped).0,
            stop: watch::channel(false).0,
            cursor: AtomicI64::new(0),
        }
    }

    pub fn state(&self) -> IngestionState {
        *self.state.borrow()
    }

    /// Receiver observing every state transition.
    pub fn watch_state(&self) -> watch::Receiver<IngestionState> {
        self.state.subscribe()
    }

    /// In-memory high-water mark: the last update handed off.
    pub fn cursor(&self) -> i64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Requests a cooperative stop. Wakes the loop out of any wait; if the
    /// loop is not running, the next [`run`](Self::run) returns at once.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Drives the loop until [`stop`](Self::stop) or a fatal error.
    pub async fn run(&self) -> Result<(), IngestionError> {
        let mut started = false;
        self.state.send_if_modified(|state| {
            if *state == IngestionState::Running {
                return false;
            }
            *state = IngestionState::Running;
            started = true;
            true
        });
        if !started {
            return Err(IngestionError::AlreadyRunning);
        }

        // Cleared only after the run ends; a stop issued before `run` applies.
        let result = self.run_inner().instrument(info_span!("ingestion")).await;
        self.stop.send_replace(false);
        let state = match &result {
            Err(IngestionError::Fatal(_)) => IngestionState::Fatal,
            _ => IngestionState::Stopped,
        };
        self.state.send_replace(state);
        result
    }

    async fn run_inner(&self) -> Result<(), IngestionError> {
        let stored = self.store.load().await.map_err(IngestionError::Cursor)?;
        let cursor = self.cursor.fetch_max(stored, Ordering::AcqRel).max(stored);
        info!(cursor, "ingestion started");

        let mut stop = self.stop.subscribe();
        let mut failures: u32 = 0;
        loop {
            if *stop.borrow() {
                info!(cursor = self.cursor(), "ingestion stopped");
                return Ok(());
            }

            let request = FetchRequest {
                offset: self.cursor() + 1,
                timeout: self.config.poll_timeout(),
                limit: self.config.batch_limit,
                allowed_updates: self.config.allowed_update_types(),
            };
            let fetched = tokio::select! {
                biased;
                _ = stopped(&mut stop) => continue,
                fetched = self.source.fetch(request) => fetched,
            };

            let delay = match fetched {
                Ok(batch) => {
                    failures = 0;
                    self.submit_batch(batch, &mut stop).await?;
                    continue;
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "fatal fetch error, halting ingestion");
                    return Err(IngestionError::Fatal(e));
                }
                Err(e) if e.is_transient() => {
                    let delay = self.backoff(failures);
                    failures = failures.saturating_add(1);
                    warn!(error = %e, attempt = failures, ?delay, "transient fetch error");
                    delay
                }
                Err(e) => {
                    let delay = match &e {
                        FetchError::Remote {
                            retry_after: Some(after),
                            ..
                        } => (*after).min(self.config.backoff_max()),
                        _ => self.config.remote_error_delay(),
                    };
                    warn!(error = %e, ?delay, "remote error");
                    delay
                }
            };
            sleep_or_stop(&mut stop, delay).await;
        }
    }

    /// Hands every new update of `batch` to the processor, retrying saturated
    /// submissions, then persists the cursor. A stop request abandons the
    /// rest of the batch; what was accepted so far is still persisted.
    async fn submit_batch(
        &self,
        batch: Vec<Update>,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), IngestionError> {
        let start = self.cursor();
        let mut result = Ok(());

        'batch: for update in batch {
            let id = update.id;
            if id <= self.cursor() {
                debug!(update_id = id, "skipping already submitted update");
                continue;
            }

            match self.processor.prepare(update).await {
                Err(rejected) => debug!(update_id = rejected.update_id, "update dropped by interceptor"),
                Ok(mut prepared) => loop {
                    match self.processor.dispatch(prepared) {
                        Ok(lane) => {
                            debug!(update_id = id, lane, "update submitted");
                            break;
                        }
                        Err(SubmitError::Saturated { lane, task }) => {
                            debug!(update_id = id, lane, "lane saturated, backing off");
                            prepared = task;
                            if sleep_or_stop(stop, self.config.backpressure_delay()).await {
                                break 'batch;
                            }
                        }
                        Err(SubmitError::ShutDown(_)) => {
                            error!(update_id = id, "executor shut down, halting ingestion");
                            result = Err(IngestionError::ExecutorShutDown);
                            break 'batch;
                        }
                    }
                },
            }
            self.cursor.fetch_max(id, Ordering::AcqRel);
        }

        let cursor = self.cursor();
        if cursor > start {
            match self.store.save(cursor).await {
                Ok(()) => debug!(cursor, "cursor saved"),
                Err(e) => warn!(cursor, error = %e, "failed to save cursor"),
            }
        }
        result
    }

    fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.min(16);
        self.config
            .backoff_base()
            .saturating_mul(factor)
            .min(self.config.backoff_max())
    }
}

/// Resolves once a stop was requested.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

/// Sleeps for `delay`. Returns `true` if a stop interrupted the sleep.
async fn sleep_or_stop(stop: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = stopped(stop) => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::executor::ShardedExecutor;
    use crate::routing::{EventInput, EventRouter};
    use crate::testing::{MemoryCursorStore, RecordingHandler, ScriptedSource};
    use ferrogram_core::{Handler, Message, UpdateKind, User};
    use tokio::time::Instant;

    fn text(id: i64, user: i64) -> Update {
        Update::new(id, UpdateKind::Message(Message::text(id, User::new(user), "hi")))
    }

    struct Harness {
        source: Arc<ScriptedSource>,
        store: Arc<MemoryCursorStore>,
        executor: Arc<ShardedExecutor>,
        handled: RecordingHandler<EventInput>,
        ingestion: Arc<IngestionLoop>,
    }

    impl Harness {
        fn new(initial_cursor: i64) -> Self {
            let executor = ShardedExecutor::start(&ExecutorConfig::default().with_lanes(2)).unwrap();
            Self::with_events(initial_cursor, executor, RecordingHandler::new())
        }

        fn with_events(
            initial_cursor: i64,
            executor: Arc<ShardedExecutor>,
            handled: RecordingHandler<EventInput>,
        ) -> Self {
            let source = Arc::new(ScriptedSource::new());
            let store = Arc::new(MemoryCursorStore::new(initial_cursor));
            let processor = EventProcessor::builder(executor.clone())
                .events(EventRouter::builder().fallback(handled.clone()).build())
                .build();
            let ingestion = Arc::new(IngestionLoop::new(
                source.clone(),
                store.clone(),
                Arc::new(processor),
                IngestionConfig::default(),
            ));
            Self {
                source,
                store,
                executor,
                handled,
                ingestion,
            }
        }

        fn spawn(&self) -> tokio::task::JoinHandle<Result<(), IngestionError>> {
            let ingestion = self.ingestion.clone();
            tokio::spawn(async move { ingestion.run().await })
        }
    }

    #[tokio::test]
    async fn cursor_advances_after_each_batch() {
        let h = Harness::new(0);
        h.source.push_batch(vec![text(1, 1), text(2, 2)]);
        h.source.push_batch(vec![text(3, 1)]);

        let runner = h.spawn();
        h.source.wait_exhausted().await;
        h.ingestion.stop();
        runner.await.unwrap().unwrap();

        let offsets: Vec<i64> = h.source.requests().iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![1, 3, 4]);
        assert_eq!(h.store.saves(), vec![2, 3]);
        assert_eq!(h.ingestion.state(), IngestionState::Stopped);

        h.executor.shutdown().await;
        assert_eq!(h.handled.count(), 3);
    }

    #[tokio::test]
    async fn already_submitted_updates_are_skipped() {
        let h = Harness::new(5);
        h.source.push_batch(vec![text(4, 1), text(5, 1), text(6, 1)]);

        let runner = h.spawn();
        h.source.wait_exhausted().await;
        h.ingestion.stop();
        runner.await.unwrap().unwrap();
        h.executor.shutdown().await;

        assert_eq!(h.source.requests()[0].offset, 6);
        assert_eq!(h.store.current(), 6);
        let ids: Vec<i64> = h.handled.inputs().iter().map(|i| i.update.id).collect();
        assert_eq!(ids, vec![6]);
    }

    #[tokio::test]
    async fn conflict_halts_until_restarted() {
        let h = Harness::new(0);
        h.source
            .push_error(FetchError::Conflict("another consumer".into()));

        let err = h.ingestion.run().await.unwrap_err();
        assert!(matches!(err, IngestionError::Fatal(FetchError::Conflict(_))));
        assert_eq!(h.ingestion.state(), IngestionState::Fatal);
        assert_eq!(h.source.fetch_count(), 1);

        h.source.push_batch(vec![text(1, 1)]);
        let runner = h.spawn();
        h.source.wait_exhausted().await;
        h.ingestion.stop();
        runner.await.unwrap().unwrap();
        assert_eq!(h.store.current(), 1);
        h.executor.shutdown().await;
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_running() {
        let h = Harness::new(0);
        let runner = h.spawn();
        let mut state = h.ingestion.watch_state();
        state
            .wait_for(|s| *s == IngestionState::Running)
            .await
            .unwrap();

        assert!(matches!(
            h.ingestion.run().await,
            Err(IngestionError::AlreadyRunning)
        ));
        h.ingestion.stop();
        runner.await.unwrap().unwrap();
        h.executor.shutdown().await;
    }

    #[tokio::test]
    async fn stop_before_run_is_honoured_once() {
        let h = Harness::new(0);
        h.ingestion.stop();

        tokio::time::timeout(Duration::from_secs(1), h.ingestion.run())
            .await
            .expect("run ignored an earlier stop")
            .unwrap();
        assert_eq!(h.ingestion.state(), IngestionState::Stopped);
        assert_eq!(h.source.fetch_count(), 0);

        // The request was consumed; the next run polls normally.
        h.source.push_batch(vec![text(1, 1)]);
        let runner = h.spawn();
        h.source.wait_exhausted().await;
        assert_eq!(h.ingestion.state(), IngestionState::Running);
        h.ingestion.stop();
        runner.await.unwrap().unwrap();
        assert_eq!(h.store.current(), 1);
        h.executor.shutdown().await;
    }

    #[tokio::test]
    async fn stop_interrupts_a_retry_delay() {
        let h = Harness::new(0);
        h.source.push_error(FetchError::Remote {
            code: 429,
            description: "Too Many Requests".into(),
            retry_after: Some(Duration::from_secs(20)),
        });

        let runner = h.spawn();
        while h.source.fetch_count() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        h.ingestion.stop();

        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("stop waited out the retry delay")
            .unwrap()
            .unwrap();
        assert_eq!(h.source.fetch_count(), 1);
        assert_eq!(h.ingestion.state(), IngestionState::Stopped);
        h.executor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_back_off_exponentially() {
        let h = Harness::new(0);
        h.source
            .push_error(FetchError::Timeout)
            .push_error(FetchError::Network("reset".into()))
            .push_error(FetchError::Timeout)
            .push_batch(vec![text(1, 1)]);

        let started = Instant::now();
        let runner = h.spawn();
        h.source.wait_exhausted().await;
        // 500ms + 1s + 2s
        assert!(started.elapsed() >= Duration::from_millis(3_500));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(h.source.fetch_count(), 5);
        assert!(h.source.requests().iter().take(4).all(|r| r.offset == 1));

        h.ingestion.stop();
        runner.await.unwrap().unwrap();
        h.executor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn remote_error_honours_retry_after() {
        let h = Harness::new(0);
        h.source.push_error(FetchError::Remote {
            code: 429,
            description: "Too Many Requests".into(),
            retry_after: Some(Duration::from_secs(2)),
        });

        let started = Instant::now();
        let runner = h.spawn();
        h.source.wait_exhausted().await;
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_secs(5));

        h.ingestion.stop();
        runner.await.unwrap().unwrap();
        h.executor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn saturation_delays_without_skipping() {
        let executor = ShardedExecutor::start(
            &ExecutorConfig::default().with_lanes(1).with_queue_capacity(1),
        )
        .unwrap();
        let (open, gate) = watch::channel(false);
        let handled = RecordingHandler::<EventInput>::new();
        let recorder = handled.clone();
        let source = Arc::new(ScriptedSource::new());
        let store = Arc::new(MemoryCursorStore::new(0));
        let processor = EventProcessor::builder(executor.clone())
            .events(
                EventRouter::builder()
                    .fallback(move |input: EventInput| {
                        let mut gate = gate.clone();
                        let recorder = recorder.clone();
                        async move {
                            let _ = gate.wait_for(|open| *open).await;
                            recorder.call(input).await;
                        }
                    })
                    .build(),
            )
            .build();
        let ingestion = Arc::new(IngestionLoop::new(
            source.clone(),
            store.clone(),
            Arc::new(processor),
            IngestionConfig::default(),
        ));
        source.push_batch(vec![text(1, 1), text(2, 1), text(3, 1)]);

        let runner = {
            let ingestion = ingestion.clone();
            tokio::spawn(async move { ingestion.run().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        // One running, one queued, the third keeps being re-offered.
        assert!(ingestion.cursor() < 3);
        assert!(store.saves().is_empty());
        assert_eq!(source.fetch_count(), 1);

        open.send_replace(true);
        source.wait_exhausted().await;
        assert_eq!(store.saves(), vec![3]);

        ingestion.stop();
        runner.await.unwrap().unwrap();
        executor.shutdown().await;
        let ids: Vec<i64> = handled.inputs().iter().map(|i| i.update.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn cursor_save_failure_is_not_fatal() {
        let h = Harness::new(0);
        h.store.fail_saves(true);
        h.source.push_batch(vec![text(1, 1)]);

        let runner = h.spawn();
        h.source.wait_exhausted().await;
        h.ingestion.stop();
        runner.await.unwrap().unwrap();

        assert_eq!(h.ingestion.cursor(), 1);
        assert!(h.store.saves().is_empty());
        assert_eq!(h.source.requests()[1].offset, 2);
        h.executor.shutdown().await;
    }
}
