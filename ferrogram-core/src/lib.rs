//! # ferrogram-core
//!
//! Core traits and data model for the ferrogram update dispatch engine.
//!
//! This crate has minimal dependencies and is meant to be imported by
//! handler crates and collaborator implementations (HTTP sources, cursor
//! stores) that do not need the engine itself.
//!
//! # Contents
//!
//! - [`Update`] and friends - the event envelope and its affinity identity
//! - [`Interceptor`] - pre/post hooks around every update
//! - [`Handler`] - terminal application logic
//! - [`UpdateSource`], [`CursorStore`] - the ingestion boundary
//! - [`CommandDispatch`], [`EventDispatch`] - lane-side collaborators
//! - [`TaskContext`] - explicit per-task context propagated into lanes
//!
//! # Error Types
//!
//! - [`FerrogramError`] - Top-level error type
//! - [`FetchError`] - Remote stream failures
//! - [`SubmitError`] - Executor backpressure and shutdown
//! - [`HandlerError`] - Faults inside lanes

#![deny(clippy::wildcard_imports)]

mod context;
mod dispatch;
mod error;
mod event;
mod handler;
mod interceptor;
mod outcome;
mod source;
mod update;

// Re-exports
pub use context::TaskContext;
pub use dispatch::{CommandDispatch, EventDispatch};
pub use error::{
    BoxError, ConfigError, FerrogramError, FetchError, HandlerError, IngestionError, RouteError,
    SubmitError,
};
pub use event::Event;
pub use handler::{DynHandler, Handler};
pub use interceptor::{DynInterceptor, HookResult, Interceptor};
pub use outcome::{Disposition, IntoOutcome, Outcome};
pub use source::{CursorStore, FetchRequest, UpdateSource};
pub use update::{
    AffinityKey, CallbackQuery, Chat, ChatKind, ChatMemberUpdated, InlineQuery, Message,
    MessageReaction, PreCheckoutQuery, Update, UpdateKind, UpdateType, User,
};
