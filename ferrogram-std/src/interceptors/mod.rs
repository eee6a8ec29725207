//! # Interceptors
//!
//! The [`InterceptorChain`] composes [`Interceptor`](ferrogram_core::Interceptor)s
//! in registration order for both pre- and post-hooks, and the standard
//! [`LoggingInterceptor`].

mod chain;
mod logging;

pub use chain::{InterceptorChain, InterceptorChainBuilder};
pub use logging::LoggingInterceptor;
