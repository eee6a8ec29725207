//! # Routing
//!
//! Lane-side routers that turn an accepted update into a handler call.
//!
//! | Router | Input | Keyed by |
//! |--------|-------|----------|
//! | [`CommandRouter`] | `/name args` messages | lowercased command name |
//! | [`CallbackRouter`] | button payloads | [`RouteTemplate`], by specificity |
//! | [`EventRouter`] | everything else | [`UpdateType`](ferrogram_core::UpdateType) |
//!
//! Routers are built once at startup through their builders and are
//! read-only afterwards.

mod callback;
mod command;
mod events;
mod input;
mod template;

pub use callback::{CallbackRouter, CallbackRouterBuilder, RouteEntry, RouteMatch};
pub use command::{CommandRouter, CommandRouterBuilder, ParsedCommand};
pub use events::{EventRouter, EventRouterBuilder};
pub use input::{CallbackInput, CommandInput, EventInput};
pub use template::{ParamError, RouteParams, RouteTemplate, Segment};
