//! # Handlers
//!
//! The terminal endpoint where application logic runs. Handlers receive an
//! owned input (a command, a resolved callback, or a generic update) and
//! return anything implementing [`IntoOutcome`].
//!
//! # Usage Patterns
//!
//! 1. **Direct closure**: `|input: CommandInput| async move { ... }`
//! 2. **Struct implementation**: `impl Handler<CommandInput> for Start`
//!
//! Registries store handlers as [`DynHandler`] trait objects, which every
//! `Handler` implements automatically.

use crate::error::BoxError;
use crate::event::Event;
use crate::outcome::IntoOutcome;
use futures::future::BoxFuture;
use std::future::Future;

/// The terminal endpoint of update processing.
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot handle input of type `{In}`",
    label = "missing `Handler<{In}>` implementation",
    note = "Handlers must implement the `call` method for the input type `{In}`."
)]
pub trait Handler<In: Event>: Send + Sync + 'static {
    /// Usually `()` or `Result<(), E>`.
    type Output: IntoOutcome;

    fn call(&self, input: In) -> impl Future<Output = Self::Output> + Send;
}

// Blanket impl for closures
impl<F, In, Out, Fut> Handler<In> for F
where
    In: Event,
    Out: IntoOutcome,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Out> + Send,
{
    type Output = Out;

    fn call(&self, input: In) -> impl Future<Output = Self::Output> + Send {
        (self)(input)
    }
}

/// Object-safe, type-erased version of [`Handler`].
pub trait DynHandler<In>: Send + Sync + 'static {
    fn call_dyn(&self, input: In) -> BoxFuture<'_, Result<(), BoxError>>;
}

impl<In, H> DynHandler<In> for H
where
    In: Event,
    H: Handler<In>,
{
    fn call_dyn(&self, input: In) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin(async move { self.call(input).await.into_outcome() })
    }
}
