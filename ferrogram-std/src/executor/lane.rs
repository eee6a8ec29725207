//! A single ordered worker lane.
//!
//! Each lane owns a bounded FIFO queue drained by exactly one execution
//! context, so at most one task runs per lane and tasks start in queue order.

use super::Task;
use crate::config::LaneStrategy;
use ferrogram_core::SubmitError;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{Instrument, debug, error, warn};

/// Errors raised while starting lanes.
#[derive(Error, Debug)]
pub enum StartError {
    /// Task lanes were requested outside a Tokio runtime.
    #[error("task lanes require a running Tokio runtime")]
    NoRuntime,

    /// The OS refused to spawn a lane thread.
    #[error("failed to spawn lane thread")]
    Spawn(#[source] std::io::Error),
}

/// Control signal broadcast to a lane's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LaneControl {
    Running,
    /// Stop accepting, finish everything already queued, then exit.
    Drain,
    /// Drop the in-flight task at its next suspension point and exit.
    Abort,
}

#[derive(Default)]
pub(crate) struct LaneCounters {
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
}

enum LaneHandle {
    Task(tokio::task::JoinHandle<()>),
    Thread(std::thread::JoinHandle<()>),
}

pub(crate) struct Lane {
    id: usize,
    sender: mpsc::Sender<Task>,
    /// Queued plus running tasks.
    depth: Arc<AtomicUsize>,
    counters: Arc<LaneCounters>,
    control: watch::Sender<LaneControl>,
    finished: watch::Receiver<bool>,
    handle: Mutex<Option<LaneHandle>>,
}

impl Lane {
    pub(crate) fn spawn(
        id: usize,
        capacity: usize,
        strategy: LaneStrategy,
    ) -> Result<Self, StartError> {
        let (sender, receiver) = mpsc::channel(capacity);
        let (control, control_rx) = watch::channel(LaneControl::Running);
        let (finished_tx, finished) = watch::channel(false);
        let depth = Arc::new(AtomicUsize::new(0));
        let counters = Arc::new(LaneCounters::default());

        let worker = LaneWorker {
            id,
            receiver,
            control: control_rx,
            depth: depth.clone(),
            counters: counters.clone(),
            finished: finished_tx,
        };

        let handle = match strategy {
            LaneStrategy::Task => {
                let runtime =
                    tokio::runtime::Handle::try_current().map_err(|_| StartError::NoRuntime)?;
                LaneHandle::Task(runtime.spawn(worker.run()))
            }
            LaneStrategy::Thread => {
                let thread = std::thread::Builder::new()
                    .name(format!("ferrogram-lane-{id}"))
                    .spawn(move || {
                        match tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                        {
                            Ok(runtime) => runtime.block_on(worker.run()),
                            Err(e) => error!(lane = id, error = %e, "failed to build lane runtime"),
                        }
                    })
                    .map_err(StartError::Spawn)?;
                LaneHandle::Thread(thread)
            }
        };

        Ok(Self {
            id,
            sender,
            depth,
            counters,
            control,
            finished,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub(crate) fn counters(&self) -> &LaneCounters {
        &self.counters
    }

    /// Appends `task` without waiting. A full queue hands the task back.
    pub(crate) fn try_push(&self, task: Task) -> Result<(), SubmitError<Task>> {
        task.context().record_lane(self.id);
        // Counted before the send so the worker's decrement can never underflow.
        self.depth.fetch_add(1, Ordering::AcqRel);
        match self.sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => {
                self.depth.fetch_sub(1, Ordering::AcqRel);
                Err(SubmitError::Saturated {
                    lane: self.id,
                    task,
                })
            }
            Err(TrySendError::Closed(task)) => {
                self.depth.fetch_sub(1, Ordering::AcqRel);
                Err(SubmitError::ShutDown(task))
            }
        }
    }

    pub(crate) fn begin_drain(&self) {
        self.control.send_replace(LaneControl::Drain);
    }

    /// Resolves once the worker exited, however it exited.
    pub(crate) async fn wait_finished(&self) {
        let mut finished = self.finished.clone();
        let _ = finished.wait_for(|done| *done).await;
    }

    pub(crate) fn force_stop(&self) {
        self.control.send_replace(LaneControl::Abort);
        if let Some(LaneHandle::Task(handle)) = self.handle.lock().as_ref() {
            handle.abort();
        }
    }

    /// Joins a drained thread lane. Task lanes need no join.
    pub(crate) async fn reap(&self) {
        let handle = self.handle.lock().take();
        if let Some(LaneHandle::Thread(thread)) = handle {
            let id = self.id;
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => error!(lane = id, "lane thread panicked"),
                Err(e) => warn!(lane = id, error = %e, "failed to join lane thread"),
            }
        }
    }
}

struct LaneWorker {
    id: usize,
    receiver: mpsc::Receiver<Task>,
    control: watch::Receiver<LaneControl>,
    depth: Arc<AtomicUsize>,
    counters: Arc<LaneCounters>,
    finished: watch::Sender<bool>,
}

impl LaneWorker {
    async fn run(self) {
        let LaneWorker {
            id,
            mut receiver,
            control,
            depth,
            counters,
            finished,
        } = self;
        let mut drain = control.clone();
        let mut abort = control;
        debug!(lane = id, "lane started");

        let body = async {
            loop {
                let next = tokio::select! {
                    biased;
                    // A dropped control sender also means drain.
                    _ = signalled(&mut drain, |c| *c != LaneControl::Running) => None,
                    task = receiver.recv() => Some(task),
                };
                match next {
                    Some(Some(task)) => execute(id, task, &depth, &counters).await,
                    Some(None) => break,
                    None => {
                        receiver.close();
                        while let Some(task) = receiver.recv().await {
                            execute(id, task, &depth, &counters).await;
                        }
                        break;
                    }
                }
            }
        };

        let aborted = async {
            if !signalled(&mut abort, |c| *c == LaneControl::Abort).await {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            biased;
            _ = aborted => warn!(lane = id, "lane force-terminated"),
            _ = body => debug!(lane = id, "lane drained"),
        }
        let _ = finished.send(true);
    }
}

/// Waits until the control value satisfies `wanted`. Returns `false` when the
/// controlling side is gone.
async fn signalled(
    control: &mut watch::Receiver<LaneControl>,
    wanted: impl Fn(&LaneControl) -> bool,
) -> bool {
    control.wait_for(|c| wanted(c)).await.is_ok()
}

async fn execute(lane: usize, task: Task, depth: &AtomicUsize, counters: &LaneCounters) {
    let Task { ctx, future } = task;
    let result = AssertUnwindSafe(future)
        .catch_unwind()
        .instrument(ctx.span().clone())
        .await;

    match result {
        Ok(Ok(())) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                parent: ctx.span(),
                lane,
                correlation_id = ctx.correlation_id(),
                error = %e,
                "lane task failed"
            );
        }
        Err(panic) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                parent: ctx.span(),
                lane,
                correlation_id = ctx.correlation_id(),
                panic = %panic_message(panic.as_ref()),
                "lane task panicked"
            );
        }
    }
    depth.fetch_sub(1, Ordering::AcqRel);
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
