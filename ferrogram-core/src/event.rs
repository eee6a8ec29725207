//! Event marker trait.

/// A marker trait for values flowing into handlers.
///
/// Events must be `Send + Sync + 'static` so they can cross into executor
/// lanes.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone)]
/// struct Reminder { chat_id: i64 }
///
/// impl Event for Reminder {}
/// ```
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a valid Event",
    label = "must be `Send + Sync + 'static`",
    note = "Handler inputs must be thread-safe and static."
)]
pub trait Event: Send + Sync + 'static {}

impl Event for () {}
impl Event for String {}
impl Event for crate::Update {}
impl<T: Event> Event for Box<T> {}
impl<T: Event> Event for std::sync::Arc<T> {}
impl<T: Event> Event for Vec<T> {}
impl<T: Event> Event for Option<T> {}
