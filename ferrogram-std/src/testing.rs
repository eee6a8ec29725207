//! Testing utilities for ferrogram.
//!
//! Doubles for the engine's collaborators, so pipelines can be exercised
//! without a network or a database.
//!
//! # Features
//!
//! - [`ScriptedSource`]: an [`UpdateSource`] replaying scripted batches and failures
//! - [`MemoryCursorStore`]: an in-memory [`CursorStore`] recording every save
//! - [`RecordingInterceptor`]: an interceptor that logs its calls
//! - [`RecordingHandler`]: a handler that records every input

use async_trait::async_trait;
use ferrogram_core::{
    BoxError, CursorStore, Event, FetchError, FetchRequest, Handler, HookResult, Interceptor,
    Outcome, Update, UpdateSource,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::watch;

// ============================================================================
// Scripted Source
// ============================================================================

/// An update source that replays a script of responses.
///
/// Once the script is exhausted every further fetch waits forever, like a
/// long-poll on an idle stream.
///
/// # Example
///
/// ```rust,ignore
/// let source = Arc::new(ScriptedSource::new());
/// source.push_batch(vec![update(1), update(2)]);
/// source.push_error(FetchError::Conflict("terminated by other getUpdates".into()));
///
/// tokio::spawn(async move { ingestion.run().await });
/// source.wait_exhausted().await;
/// ```
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Vec<Update>, FetchError>>>,
    requests: Mutex<Vec<FetchRequest>>,
    exhausted: watch::Sender<bool>,
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            exhausted: watch::channel(false).0,
        }
    }

    /// Appends a successful batch.
    pub fn push_batch(&self, updates: Vec<Update>) -> &Self {
        self.script.lock().push_back(Ok(updates));
        self.exhausted.send_replace(false);
        self
    }

    /// Appends a failure.
    pub fn push_error(&self, error: FetchError) -> &Self {
        self.script.lock().push_back(Err(error));
        self.exhausted.send_replace(false);
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Resolves once a fetch found the script empty.
    pub async fn wait_exhausted(&self) {
        let mut exhausted = self.exhausted.subscribe();
        let _ = exhausted.wait_for(|done| *done).await;
    }
}

#[async_trait]
impl UpdateSource for ScriptedSource {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<Update>, FetchError> {
        self.requests.lock().push(request);
        let next = self.script.lock().pop_front();
        match next {
            Some(response) => response,
            None => {
                self.exhausted.send_replace(true);
                std::future::pending().await
            }
        }
    }
}

// ============================================================================
// Memory Cursor Store
// ============================================================================

/// An in-memory cursor store.
#[derive(Default)]
pub struct MemoryCursorStore {
    cursor: AtomicI64,
    saves: Mutex<Vec<i64>>,
    fail_saves: AtomicBool,
}

impl MemoryCursorStore {
    pub fn new(initial: i64) -> Self {
        Self {
            cursor: AtomicI64::new(initial),
            saves: Mutex::new(Vec::new()),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// The last successfully saved cursor.
    pub fn current(&self) -> i64 {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Every successful save, in order.
    pub fn saves(&self) -> Vec<i64> {
        self.saves.lock().clone()
    }

    /// Makes subsequent saves fail.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<i64, BoxError> {
        Ok(self.current())
    }

    async fn save(&self, cursor: i64) -> Result<(), BoxError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err("cursor store unavailable".into());
        }
        self.cursor.store(cursor, Ordering::SeqCst);
        self.saves.lock().push(cursor);
        Ok(())
    }
}

// ============================================================================
// Recording Interceptor
// ============================================================================

/// Log shared between recording interceptors.
pub type SharedLog = Arc<Mutex<Vec<String>>>;

/// An interceptor that appends `name:pre:<id>` and `name:post:<id>:ok|err`
/// entries to a shared log.
#[derive(Clone)]
pub struct RecordingInterceptor {
    name: &'static str,
    log: SharedLog,
    result: HookResult,
}

impl RecordingInterceptor {
    pub fn shared_log() -> SharedLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn named(name: &'static str, log: SharedLog) -> Self {
        Self {
            name,
            log,
            result: HookResult::Next,
        }
    }

    /// Makes the pre-hook return [`HookResult::Stop`].
    pub fn stopping(mut self) -> Self {
        self.result = HookResult::Stop;
        self
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl Interceptor for RecordingInterceptor {
    async fn pre_handle(&self, update: &Update) -> Result<HookResult, BoxError> {
        self.log.lock().push(format!("{}:pre:{}", self.name, update.id));
        Ok(self.result)
    }

    async fn post_handle(&self, update: &Update, outcome: &Outcome) -> Result<(), BoxError> {
        let status = if outcome.is_success() { "ok" } else { "err" };
        self.log
            .lock()
            .push(format!("{}:post:{}:{}", self.name, update.id, status));
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

// ============================================================================
// Recording Handler
// ============================================================================

/// A handler that records every input it receives.
///
/// # Example
///
/// ```rust,ignore
/// let recorder = RecordingHandler::<CommandInput>::new();
/// let router = CommandRouter::builder().command("start", recorder.clone()).build();
///
/// // ... dispatch ...
/// assert_eq!(recorder.count(), 1);
/// ```
pub struct RecordingHandler<In> {
    inputs: Arc<Mutex<Vec<In>>>,
}

impl<In> RecordingHandler<In> {
    pub fn new() -> Self {
        Self {
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn count(&self) -> usize {
        self.inputs.lock().len()
    }
}

impl<In: Clone> RecordingHandler<In> {
    pub fn inputs(&self) -> Vec<In> {
        self.inputs.lock().clone()
    }
}

impl<In> Default for RecordingHandler<In> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In> Clone for RecordingHandler<In> {
    fn clone(&self) -> Self {
        Self {
            inputs: self.inputs.clone(),
        }
    }
}

impl<In: Event> Handler<In> for RecordingHandler<In> {
    type Output = ();

    async fn call(&self, input: In) -> Self::Output {
        self.inputs.lock().push(input);
    }
}
