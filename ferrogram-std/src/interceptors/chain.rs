//! Ordered interceptor chain.

use crate::executor::panic_message;
use ferrogram_core::{DynInterceptor, HookResult, Outcome, Update};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Interceptors in registration order.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn DynInterceptor>>,
}

impl InterceptorChain {
    pub fn builder() -> InterceptorChainBuilder {
        InterceptorChainBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs pre-hooks in order until one stops the update.
    ///
    /// An interceptor that fails or panics stops the update as well.
    pub async fn pre_handle(&self, update: &Update) -> HookResult {
        for interceptor in &self.interceptors {
            let name = interceptor.name_dyn();
            let result = AssertUnwindSafe(interceptor.pre_handle_dyn(update))
                .catch_unwind()
                .await;
            match result {
                Ok(Ok(HookResult::Next)) => continue,
                Ok(Ok(HookResult::Stop)) => {
                    debug!(update_id = update.id, interceptor = name, "update stopped");
                    return HookResult::Stop;
                }
                Ok(Err(e)) => {
                    warn!(
                        update_id = update.id,
                        interceptor = name,
                        error = %e,
                        "pre-interceptor failed, dropping update"
                    );
                    return HookResult::Stop;
                }
                Err(panic) => {
                    error!(
                        update_id = update.id,
                        interceptor = name,
                        panic = %panic_message(panic.as_ref()),
                        "pre-interceptor panicked, dropping update"
                    );
                    return HookResult::Stop;
                }
            }
        }
        HookResult::Next
    }

    /// Runs every post-hook in order. Failures are logged one by one and
    /// never skip the remaining interceptors.
    pub async fn post_handle(&self, update: &Update, outcome: &Outcome) {
        for interceptor in &self.interceptors {
            let name = interceptor.name_dyn();
            let result = AssertUnwindSafe(interceptor.post_handle_dyn(update, outcome))
                .catch_unwind()
                .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    update_id = update.id,
                    interceptor = name,
                    error = %e,
                    "post-interceptor failed"
                ),
                Err(panic) => error!(
                    update_id = update.id,
                    interceptor = name,
                    panic = %panic_message(panic.as_ref()),
                    "post-interceptor panicked"
                ),
            }
        }
    }
}

/// Builder for constructing an [`InterceptorChain`].
#[derive(Default)]
pub struct InterceptorChainBuilder {
    interceptors: Vec<Arc<dyn DynInterceptor>>,
}

impl InterceptorChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an interceptor; registration order is execution order.
    pub fn register<I: DynInterceptor>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn register_arc(mut self, interceptor: Arc<dyn DynInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> InterceptorChain {
        InterceptorChain {
            interceptors: self.interceptors,
        }
    }
}
