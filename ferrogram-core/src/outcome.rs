//! Handler outcomes as observed by post-interceptors.

use crate::error::{BoxError, HandlerError};
use crate::update::UpdateType;
use std::time::Duration;

/// Which path handled an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A command handler ran.
    Command(String),
    /// A callback route matched; carries the route template.
    Callback(String),
    /// A generic event handler ran.
    Event(UpdateType),
    /// Nothing was registered for the update. Not an error.
    Unrouted,
    /// The handler was skipped by the rate limiter.
    RateLimited { retry_after: Duration },
}

/// Result of handling one accepted update.
#[derive(Debug)]
pub struct Outcome {
    disposition: Option<Disposition>,
    error: Option<HandlerError>,
}

impl Outcome {
    pub fn handled(disposition: Disposition) -> Self {
        Self {
            disposition: Some(disposition),
            error: None,
        }
    }

    pub fn failed(error: HandlerError) -> Self {
        Self {
            disposition: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&HandlerError> {
        self.error.as_ref()
    }

    pub fn disposition(&self) -> Option<&Disposition> {
        self.disposition.as_ref()
    }

    /// Consumes the outcome, yielding the fault if there was one.
    pub fn into_error(self) -> Option<HandlerError> {
        self.error
    }
}

/// Conversion of a handler's return value into a success/failure result.
///
/// # Default Implementations
///
/// - `()` → success
/// - `Result<T, E>` → delegates to `T`, or fails with `E`
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not an `IntoOutcome`",
    label = "handlers must return `()` or `Result<(), E>`",
    note = "IntoOutcome must implement the `into_outcome` method."
)]
pub trait IntoOutcome: Send + 'static {
    fn into_outcome(self) -> Result<(), BoxError>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoOutcome,
    E: Into<BoxError> + Send + 'static,
{
    fn into_outcome(self) -> Result<(), BoxError> {
        self.map_err(Into::into).and_then(IntoOutcome::into_outcome)
    }
}
