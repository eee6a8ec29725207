//! # Sharded Executor
//!
//! A fixed set of strictly sequential lanes that run in parallel with each
//! other. Work is placed by affinity key:
//!
//! - a task with a key goes to the lane that key was first assigned to
//!   (sticky until the key is evicted from the bounded [`AffinityTable`]);
//! - an unseen key, or a task without a key, goes to the least-loaded lane
//!   (lowest queue depth, ties to the lowest index, an idle lane wins
//!   immediately).
//!
//! Within a lane tasks start in submission order, so tasks sharing a key are
//! totally ordered. A full lane rejects with [`SubmitError::Saturated`] and
//! hands the task back; nothing blocks and nothing grows unbounded.
//!
//! # Example
//!
//! ```rust,ignore
//! let executor = ShardedExecutor::start(&ExecutorConfig::default())?;
//! let key = AffinityKey::User(42);
//! let ctx = TaskContext::detached("job-1", Some(key.clone()));
//! executor.submit(Some(&key), Task::new(ctx, async { Ok(()) }))?;
//! executor.shutdown().await;
//! ```

mod affinity;
mod lane;

pub use affinity::AffinityTable;
pub use lane::StartError;

use crate::config::ExecutorConfig;
use ferrogram_core::{AffinityKey, BoxError, SubmitError, TaskContext};
use futures::future::{BoxFuture, join_all};
use lane::Lane;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub(crate) use lane::panic_message;

/// A unit of work bound to its [`TaskContext`].
pub struct Task {
    ctx: TaskContext,
    future: BoxFuture<'static, Result<(), BoxError>>,
}

impl Task {
    pub fn new<F>(ctx: TaskContext, future: F) -> Self
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            ctx,
            future: Box::pin(future),
        }
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("correlation_id", &self.ctx.correlation_id())
            .finish_non_exhaustive()
    }
}

/// Point-in-time counters of one lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneStats {
    pub lane: usize,
    /// Queued plus running tasks.
    pub depth: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Point-in-time view of the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorStats {
    pub lanes: Vec<LaneStats>,
    pub affinity_entries: usize,
    pub accepting: bool,
}

/// Result of [`ShardedExecutor::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Lanes that finished their queue within the grace period.
    pub drained: Vec<usize>,
    /// Lanes terminated after the grace period.
    pub aborted: Vec<usize>,
}

/// Per-key FIFO executor over a fixed set of lanes.
pub struct ShardedExecutor {
    lanes: Vec<Lane>,
    affinity: AffinityTable,
    accepting: AtomicBool,
    grace: Duration,
    shutdown: OnceCell<ShutdownReport>,
}

impl ShardedExecutor {
    /// Creates and starts all lanes.
    pub fn start(config: &ExecutorConfig) -> Result<Arc<Self>, BoxError> {
        config.validate()?;
        let lanes = (0..config.lanes)
            .map(|id| Lane::spawn(id, config.queue_capacity, config.strategy))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            lanes = config.lanes,
            queue_capacity = config.queue_capacity,
            affinity_capacity = config.affinity_capacity,
            strategy = ?config.strategy,
            "executor started"
        );

        Ok(Arc::new(Self {
            lanes,
            affinity: AffinityTable::new(config.affinity_capacity),
            accepting: AtomicBool::new(true),
            grace: config.shutdown_grace(),
            shutdown: OnceCell::new(),
        }))
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Appends `task` to the lane chosen for `key` and returns that lane.
    ///
    /// Never blocks: a full lane returns [`SubmitError::Saturated`] and a
    /// stopped executor [`SubmitError::ShutDown`], both carrying the task.
    pub fn submit(&self, key: Option<&AffinityKey>, task: Task) -> Result<usize, SubmitError<Task>> {
        if !self.is_accepting() {
            return Err(SubmitError::ShutDown(task));
        }
        let lane = match key {
            Some(key) => self.affinity.get_or_assign(key, || self.least_loaded()),
            None => self.least_loaded(),
        };
        self.lanes[lane].try_push(task).map(|()| lane)
    }

    /// Lane currently pinned to `key`, without refreshing it.
    pub fn lane_for(&self, key: &AffinityKey) -> Option<usize> {
        self.affinity.peek(key)
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            lanes: self
                .lanes
                .iter()
                .map(|lane| LaneStats {
                    lane: lane.id(),
                    depth: lane.depth(),
                    completed: lane.counters().completed.load(Ordering::Relaxed),
                    failed: lane.counters().failed.load(Ordering::Relaxed),
                })
                .collect(),
            affinity_entries: self.affinity.len(),
            accepting: self.is_accepting(),
        }
    }

    fn least_loaded(&self) -> usize {
        let mut best = 0;
        let mut best_depth = usize::MAX;
        for lane in &self.lanes {
            let depth = lane.depth();
            if depth == 0 {
                return lane.id();
            }
            if depth < best_depth {
                best = lane.id();
                best_depth = depth;
            }
        }
        best
    }

    /// Stops accepting work, lets every lane drain for up to the grace
    /// period, then force-terminates lanes still running.
    ///
    /// Idempotent: later and concurrent callers await the same report.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutdown.get_or_init(|| self.drain()).await.clone()
    }

    async fn drain(&self) -> ShutdownReport {
        self.accepting.store(false, Ordering::Release);
        info!(lanes = self.lanes.len(), grace = ?self.grace, "executor shutting down");

        for lane in &self.lanes {
            lane.begin_drain();
        }

        let grace = self.grace;
        let results = join_all(self.lanes.iter().map(|lane| async move {
            let drained = tokio::time::timeout(grace, lane.wait_finished())
                .await
                .is_ok();
            (lane, drained)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (lane, drained) in results {
            if drained {
                lane.reap().await;
                report.drained.push(lane.id());
            } else {
                warn!(lane = lane.id(), depth = lane.depth(), "lane missed shutdown grace period");
                lane.force_stop();
                report.aborted.push(lane.id());
            }
        }

        info!(
            drained = report.drained.len(),
            aborted = report.aborted.len(),
            "executor stopped"
        );
        report
    }
}

impl Drop for ShardedExecutor {
    fn drop(&mut self) {
        // Closing the queues lets lanes finish what they hold and exit.
        for lane in &self.lanes {
            lane.begin_drain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaneStrategy;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{Barrier, oneshot, watch};

    fn config(lanes: usize) -> ExecutorConfig {
        ExecutorConfig::default()
            .with_lanes(lanes)
            .with_queue_capacity(16)
            .with_shutdown_grace(Duration::from_secs(2))
    }

    fn task<F>(label: &str, future: F) -> Task
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Task::new(TaskContext::detached(label, None), future)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_key_runs_in_submission_order() {
        let executor = ShardedExecutor::start(&config(4)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let key = AffinityKey::User(1);

        for i in 0..10 {
            let seen = seen.clone();
            executor
                .submit(
                    Some(&key),
                    task("ordered", async move {
                        tokio::task::yield_now().await;
                        seen.lock().push(i);
                        Ok(())
                    }),
                )
                .unwrap();
        }

        executor.shutdown().await;
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn different_lanes_run_in_parallel() {
        let executor = ShardedExecutor::start(&config(2)).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        // Both tasks must be running at once for the barrier to open.
        for id in 0..2 {
            let barrier = barrier.clone();
            let lane = executor
                .submit(
                    Some(&AffinityKey::User(id)),
                    task("parallel", async move {
                        barrier.wait().await;
                        Ok(())
                    }),
                )
                .unwrap();
            assert_eq!(lane, id as usize);
        }

        let report = tokio::time::timeout(Duration::from_secs(5), executor.shutdown())
            .await
            .unwrap();
        assert!(report.aborted.is_empty());
    }

    #[tokio::test]
    async fn keyless_tasks_pick_idle_lane_first() {
        let executor = ShardedExecutor::start(&config(3)).unwrap();
        let (open, gate) = watch::channel(false);

        let mut lanes = Vec::new();
        for _ in 0..3 {
            let mut gate = gate.clone();
            lanes.push(
                executor
                    .submit(
                        None,
                        task("blocked", async move {
                            let _ = gate.wait_for(|open| *open).await;
                            Ok(())
                        }),
                    )
                    .unwrap(),
            );
        }
        assert_eq!(lanes, vec![0, 1, 2]);

        // All lanes hold one task; ties go to the lowest index.
        let next = executor.submit(None, task("tie", async { Ok(()) })).unwrap();
        assert_eq!(next, 0);

        open.send_replace(true);
        let report = executor.shutdown().await;
        assert!(report.aborted.is_empty());
    }

    #[tokio::test]
    async fn full_lane_reports_saturation_and_returns_task() {
        let executor = ShardedExecutor::start(&config(1).with_queue_capacity(1)).unwrap();
        let (release, hold) = oneshot::channel::<()>();
        let (started_tx, started) = oneshot::channel::<()>();

        executor
            .submit(
                None,
                task("running", async move {
                    let _ = started_tx.send(());
                    let _ = hold.await;
                    Ok(())
                }),
            )
            .unwrap();
        started.await.unwrap();

        executor.submit(None, task("queued", async { Ok(()) })).unwrap();
        let err = executor
            .submit(None, task("rejected", async { Ok(()) }))
            .unwrap_err();
        assert!(err.is_saturated());
        assert_eq!(err.into_task().context().correlation_id(), "rejected");

        let _ = release.send(());
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn failing_and_panicking_tasks_do_not_stop_the_lane() {
        let executor = ShardedExecutor::start(&config(1)).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        executor
            .submit(None, task("fails", async { Err("boom".into()) }))
            .unwrap();
        executor
            .submit(
                None,
                task("panics", async {
                    if true {
                        panic!("handler bug");
                    }
                    Ok(())
                }),
            )
            .unwrap();
        let counter = ran.clone();
        executor
            .submit(
                None,
                task("after", async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        executor.shutdown().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        let stats = executor.stats();
        assert_eq!(stats.lanes[0].failed, 2);
        assert_eq!(stats.lanes[0].completed, 1);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_rejects_new_work() {
        let executor = ShardedExecutor::start(&config(2)).unwrap();
        let first = executor.shutdown().await;
        let second = executor.shutdown().await;
        assert_eq!(first, second);
        assert_eq!(first.drained.len(), 2);

        let err = executor.submit(None, task("late", async { Ok(()) })).unwrap_err();
        assert!(matches!(err, SubmitError::ShutDown(_)));
    }

    #[tokio::test]
    async fn stuck_lane_is_force_terminated() {
        let executor = ShardedExecutor::start(
            &config(2).with_shutdown_grace(Duration::from_millis(50)),
        )
        .unwrap();
        executor
            .submit(
                Some(&AffinityKey::User(1)),
                task("stuck", std::future::pending()),
            )
            .unwrap();

        let report = executor.shutdown().await;
        assert_eq!(report.aborted, vec![0]);
        assert_eq!(report.drained, vec![1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn thread_lanes_preserve_order() {
        let executor =
            ShardedExecutor::start(&config(2).with_strategy(LaneStrategy::Thread)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let key = AffinityKey::Name("thread".into());

        for i in 0..20 {
            let seen = seen.clone();
            executor
                .submit(
                    Some(&key),
                    task("thread", async move {
                        seen.lock().push(i);
                        Ok(())
                    }),
                )
                .unwrap();
        }

        let report = executor.shutdown().await;
        assert!(report.aborted.is_empty());
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
    }
}
