//! # Event Processor
//!
//! Orchestrates one update from intake to outcome:
//!
//! 1. [`prepare`](EventProcessor::prepare) runs the pre-interceptors once and
//!    derives the affinity key;
//! 2. [`dispatch`](EventProcessor::dispatch) submits the prepared task to the
//!    [`ShardedExecutor`]; a saturated lane hands the [`Prepared`] back so the
//!    caller can retry it without re-running pre-interceptors;
//! 3. inside the lane the update is routed by shape (command, callback
//!    payload, anything else), handler faults and panics become a failed
//!    [`Outcome`], and the post-interceptors run exactly once.

use crate::executor::{ShardedExecutor, Task, panic_message};
use crate::interceptors::InterceptorChain;
use crate::routing::{CallbackRouter, CommandRouter, EventRouter};
use ferrogram_core::{
    AffinityKey, BoxError, CommandDispatch, Disposition, EventDispatch, HandlerError, HookResult,
    Outcome, SubmitError, TaskContext, Update,
};
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// An update that passed the pre-interceptors and is ready for submission.
pub struct Prepared {
    update_id: i64,
    key: Option<AffinityKey>,
    task: Task,
}

impl Prepared {
    pub fn update_id(&self) -> i64 {
        self.update_id
    }

    pub fn key(&self) -> Option<&AffinityKey> {
        self.key.as_ref()
    }

    pub fn context(&self) -> &TaskContext {
        self.task.context()
    }
}

impl fmt::Debug for Prepared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prepared")
            .field("update_id", &self.update_id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// A pre-interceptor stopped the update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub update_id: i64,
}

struct Routes {
    interceptors: InterceptorChain,
    commands: Arc<dyn CommandDispatch>,
    callbacks: Arc<CallbackRouter>,
    events: Arc<dyn EventDispatch>,
}

impl Routes {
    async fn route(&self, update: Arc<Update>, ctx: TaskContext) -> Result<Disposition, BoxError> {
        if update.is_command() {
            self.commands.dispatch_command(update, ctx).await
        } else if update.callback_data().is_some() {
            self.callbacks.dispatch(update, ctx).await
        } else {
            self.events.dispatch_event(update, ctx).await
        }
    }

    async fn handle(&self, update: Arc<Update>, ctx: TaskContext) -> Outcome {
        let routed = AssertUnwindSafe(self.route(update, ctx))
            .catch_unwind()
            .await;
        match routed {
            Ok(Ok(disposition)) => Outcome::handled(disposition),
            Ok(Err(e)) => Outcome::failed(HandlerError::Failed(e)),
            Err(panic) => Outcome::failed(HandlerError::Panicked(panic_message(panic.as_ref()))),
        }
    }

    async fn run(self: Arc<Self>, update: Arc<Update>, ctx: TaskContext) -> Result<(), BoxError> {
        let outcome = self.handle(update.clone(), ctx).await;
        self.interceptors.post_handle(&update, &outcome).await;
        match outcome.into_error() {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}

/// Builder for constructing an [`EventProcessor`].
pub struct EventProcessorBuilder {
    executor: Arc<ShardedExecutor>,
    interceptors: InterceptorChain,
    commands: Option<Arc<dyn CommandDispatch>>,
    callbacks: Option<Arc<CallbackRouter>>,
    events: Option<Arc<dyn EventDispatch>>,
}

impl EventProcessorBuilder {
    pub fn interceptors(mut self, chain: InterceptorChain) -> Self {
        self.interceptors = chain;
        self
    }

    pub fn commands<C: CommandDispatch + 'static>(mut self, commands: C) -> Self {
        self.commands = Some(Arc::new(commands));
        self
    }

    pub fn commands_arc(mut self, commands: Arc<dyn CommandDispatch>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn callbacks(mut self, router: CallbackRouter) -> Self {
        self.callbacks = Some(Arc::new(router));
        self
    }

    pub fn events<E: EventDispatch + 'static>(mut self, events: E) -> Self {
        self.events = Some(Arc::new(events));
        self
    }

    pub fn events_arc(mut self, events: Arc<dyn EventDispatch>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> EventProcessor {
        EventProcessor {
            executor: self.executor,
            routes: Arc::new(Routes {
                interceptors: self.interceptors,
                commands: self
                    .commands
                    .unwrap_or_else(|| Arc::new(CommandRouter::default())),
                callbacks: self.callbacks.unwrap_or_default(),
                events: self
                    .events
                    .unwrap_or_else(|| Arc::new(EventRouter::default())),
            }),
        }
    }
}

/// Runs interceptors around every update and feeds the executor.
pub struct EventProcessor {
    executor: Arc<ShardedExecutor>,
    routes: Arc<Routes>,
}

impl EventProcessor {
    pub fn builder(executor: Arc<ShardedExecutor>) -> EventProcessorBuilder {
        EventProcessorBuilder {
            executor,
            interceptors: InterceptorChain::default(),
            commands: None,
            callbacks: None,
            events: None,
        }
    }

    pub fn executor(&self) -> &Arc<ShardedExecutor> {
        &self.executor
    }

    /// Runs the pre-interceptors and binds the update to its lane task.
    pub async fn prepare(&self, update: Update) -> Result<Prepared, Rejected> {
        if self.routes.interceptors.pre_handle(&update).await == HookResult::Stop {
            return Err(Rejected {
                update_id: update.id,
            });
        }

        let key = update.affinity_key();
        let ctx = TaskContext::for_update(&update, key.clone());
        let update_id = update.id;
        let update = Arc::new(update);
        let routes = self.routes.clone();
        let task = Task::new(ctx.clone(), routes.run(update, ctx));
        Ok(Prepared {
            update_id,
            key,
            task,
        })
    }

    /// Submits a prepared update. Never blocks.
    pub fn dispatch(&self, prepared: Prepared) -> Result<usize, SubmitError<Prepared>> {
        let Prepared {
            update_id,
            key,
            task,
        } = prepared;
        self.executor.submit(key.as_ref(), task).map_err(|err| {
            let rebuild = |task| Prepared {
                update_id,
                key,
                task,
            };
            match err {
                SubmitError::Saturated { lane, task } => SubmitError::Saturated {
                    lane,
                    task: rebuild(task),
                },
                SubmitError::ShutDown(task) => SubmitError::ShutDown(rebuild(task)),
            }
        })
    }

    /// Prepares and submits in one step. `Ok(None)` means a pre-interceptor
    /// stopped the update.
    pub async fn submit(&self, update: Update) -> Result<Option<usize>, SubmitError<Prepared>> {
        match self.prepare(update).await {
            Ok(prepared) => self.dispatch(prepared).map(Some),
            Err(_) => Ok(None),
        }
    }
}
