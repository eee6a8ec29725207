//! # ferrogram-std
//!
//! Standard engine implementations for ferrogram.
//!
//! This crate provides:
//! - **Executor**: [`ShardedExecutor`], per-key FIFO lanes with least-loaded placement
//! - **Routing**: [`CommandRouter`], [`CallbackRouter`], [`EventRouter`]
//! - **Rate limiting**: [`RateLimiter`] over lock-free token buckets
//! - **Interceptors**: [`InterceptorChain`], [`LoggingInterceptor`]
//! - **Orchestration**: [`EventProcessor`], [`IngestionLoop`]
//! - **Configuration**: [`EngineConfig`] and its sections

#![deny(clippy::wildcard_imports)]

// Re-export core
pub use ferrogram_core;

pub mod config;
pub mod executor;
pub mod ingestion;
pub mod interceptors;
pub mod processor;
pub mod ratelimit;
pub mod routing;
pub mod testing;

pub use config::{
    EngineConfig, ExecutorConfig, IngestionConfig, LaneStrategy, LoggingConfig, RateLimitConfig,
    RuleConfig,
};
pub use executor::{ExecutorStats, LaneStats, ShardedExecutor, ShutdownReport, Task};
pub use ingestion::{IngestionLoop, IngestionState};
pub use interceptors::{InterceptorChain, InterceptorChainBuilder, LoggingInterceptor};
pub use processor::{EventProcessor, EventProcessorBuilder, Prepared, Rejected};
pub use ratelimit::{
    LimitScope, RateLimitRule, RateLimited, RateLimiter, callback_key, command_key,
};
pub use routing::{
    CallbackInput, CallbackRouter, CallbackRouterBuilder, CommandInput, CommandRouter,
    CommandRouterBuilder, EventInput, EventRouter, EventRouterBuilder, RouteParams, RouteTemplate,
};
