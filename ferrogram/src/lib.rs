//! # ferrogram - Ordered, Sharded Update Dispatch
//!
//! `ferrogram` pulls updates from a chat-bot platform's long-poll stream and
//! dispatches them to application handlers with three guarantees:
//!
//! - updates sharing an affinity key (user, chat or inline query) are handled
//!   strictly in arrival order
//! - updates for different keys run in parallel across a fixed set of lanes
//! - a full lane pauses ingestion instead of dropping updates
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ferrogram::prelude::*;
//!
//! async fn start(input: CommandInput) -> Result<(), BoxError> {
//!     tracing::info!(args = input.args(), "start");
//!     Ok(())
//! }
//!
//! async fn buy(input: CallbackInput) -> Result<(), BoxError> {
//!     let item: u64 = input.params.parse("item_id")?;
//!     tracing::info!(item, "buy");
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), FerrogramError> {
//!     let config = EngineConfig::load(None)?;
//!     ferrogram::logging::init_tracing(&config.logging);
//!
//!     let engine = Engine::builder()
//!         .config(config)
//!         .source(MySource::new())
//!         .cursor_store(MyCursorStore::new())
//!         .interceptor(LoggingInterceptor)
//!         .command("start", start)
//!         .callback("store:buy:{item_id}", buy)
//!         .build()?;
//!
//!     engine.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
//! }
//! ```

#![deny(clippy::wildcard_imports)]

pub mod engine;
pub mod logging;

pub use engine::{Engine, EngineBuilder};

pub use ferrogram_core::{
    // Data model
    AffinityKey,
    // Errors
    BoxError,
    CallbackQuery,
    Chat,
    ChatKind,
    ChatMemberUpdated,
    // Lane-side collaborators
    CommandDispatch,
    ConfigError,
    // Ingestion boundary
    CursorStore,
    Disposition,
    DynHandler,
    DynInterceptor,
    Event,
    EventDispatch,
    FerrogramError,
    FetchError,
    FetchRequest,
    // Handler
    Handler,
    HandlerError,
    HookResult,
    IngestionError,
    InlineQuery,
    // Interceptor
    Interceptor,
    IntoOutcome,
    Message,
    MessageReaction,
    Outcome,
    PreCheckoutQuery,
    RouteError,
    SubmitError,
    // Context
    TaskContext,
    Update,
    UpdateKind,
    UpdateSource,
    UpdateType,
    User,
};

pub use ferrogram_std::{
    // Configuration
    EngineConfig,
    // Executor
    ExecutorConfig,
    ExecutorStats,
    // Orchestration
    EventProcessor,
    IngestionConfig,
    IngestionLoop,
    IngestionState,
    LaneStats,
    LaneStrategy,
    LoggingConfig,
    // Rate limiting
    LimitScope,
    RateLimitConfig,
    RateLimitRule,
    RateLimited,
    RateLimiter,
    RuleConfig,
    ShardedExecutor,
    ShutdownReport,
    Task,
    callback_key,
    command_key,
};

/// Command, callback and event routing.
pub mod routing {
    #![allow(clippy::wildcard_imports)]
    pub use ferrogram_std::routing::*;
}

/// Interceptor chain and standard interceptors.
pub mod interceptors {
    #![allow(clippy::wildcard_imports)]
    pub use ferrogram_std::interceptors::*;
}

/// Testing utilities.
pub mod testing {
    #![allow(clippy::wildcard_imports)]
    pub use ferrogram_std::testing::*;
}

/// Prelude module - common imports for ferrogram.
///
/// # Usage
///
/// ```rust,ignore
/// use ferrogram::prelude::*;
/// ```
pub mod prelude {
    pub use crate::interceptors::LoggingInterceptor;
    pub use crate::routing::{CallbackInput, CommandInput, EventInput, RouteParams};
    pub use crate::{
        AffinityKey, BoxError, CursorStore, Engine, EngineConfig, FerrogramError, FetchError,
        FetchRequest, Handler, HookResult, Interceptor, Outcome, RateLimitRule, Update,
        UpdateSource, UpdateType,
    };
}
