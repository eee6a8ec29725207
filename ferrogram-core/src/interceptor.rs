//! # Interceptors
//!
//! Hooks wrapped around every update the engine processes.
//!
//! `pre_handle` runs before the update is submitted to the executor and may
//! stop it; `post_handle` runs inside the lane after the handler returned (or
//! failed) and observes the [`Outcome`].
//!
//! # Use Cases
//!
//! - Logging and metrics
//! - Banning users or ignoring chats before any handler sees the update
//! - Reporting handler failures back to the user
//!
//! # Static vs Dynamic Dispatch
//!
//! [`Interceptor`] uses native `async fn`-style methods for zero-cost static
//! dispatch. Chains store interceptors as [`DynInterceptor`] trait objects,
//! which every `Interceptor` implements automatically.

use crate::error::BoxError;
use crate::outcome::Outcome;
use crate::update::Update;
use futures::future::BoxFuture;
use std::future::Future;

/// Result of a pre-interceptor indicating whether to continue or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookResult {
    /// Continue to the next interceptor and, eventually, the handler.
    Next,
    /// Drop the update: no further interceptors, no handler, no post-hooks.
    Stop,
}

/// A pre/post hook around update processing.
#[diagnostic::on_unimplemented(
    message = "`{Self}` does not implement `Interceptor`",
    label = "missing `Interceptor` implementation",
    note = "Interceptors implement `pre_handle` and/or `post_handle`."
)]
pub trait Interceptor: Send + Sync + 'static {
    /// Called before the update is submitted.
    fn pre_handle(
        &self,
        _update: &Update,
    ) -> impl Future<Output = Result<HookResult, BoxError>> + Send {
        async { Ok(HookResult::Next) }
    }

    /// Called after the handler finished, once per accepted update.
    fn post_handle(
        &self,
        _update: &Update,
        _outcome: &Outcome,
    ) -> impl Future<Output = Result<(), BoxError>> + Send {
        async { Ok(()) }
    }

    /// Name used in log records.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Dynamic object-safe version of [`Interceptor`].
pub trait DynInterceptor: Send + Sync + 'static {
    fn pre_handle_dyn<'a>(&'a self, update: &'a Update) -> BoxFuture<'a, Result<HookResult, BoxError>>;

    fn post_handle_dyn<'a>(
        &'a self,
        update: &'a Update,
        outcome: &'a Outcome,
    ) -> BoxFuture<'a, Result<(), BoxError>>;

    fn name_dyn(&self) -> &'static str;
}

impl<T: Interceptor> DynInterceptor for T {
    fn pre_handle_dyn<'a>(&'a self, update: &'a Update) -> BoxFuture<'a, Result<HookResult, BoxError>> {
        Box::pin(self.pre_handle(update))
    }

    fn post_handle_dyn<'a>(
        &'a self,
        update: &'a Update,
        outcome: &'a Outcome,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(self.post_handle(update, outcome))
    }

    fn name_dyn(&self) -> &'static str {
        self.name()
    }
}

// Allow Box<dyn DynInterceptor> to be used where Interceptor is expected.
impl Interceptor for Box<dyn DynInterceptor> {
    async fn pre_handle(&self, update: &Update) -> Result<HookResult, BoxError> {
        self.pre_handle_dyn(update).await
    }

    async fn post_handle(&self, update: &Update, outcome: &Outcome) -> Result<(), BoxError> {
        self.post_handle_dyn(update, outcome).await
    }

    fn name(&self) -> &'static str {
        self.name_dyn()
    }
}
