//! Collaborator traits invoked from inside executor lanes.

use crate::context::TaskContext;
use crate::error::BoxError;
use crate::outcome::Disposition;
use crate::update::Update;
use async_trait::async_trait;
use std::sync::Arc;

/// Resolves and invokes the handler for a command-shaped update.
#[async_trait]
pub trait CommandDispatch: Send + Sync {
    async fn dispatch_command(
        &self,
        update: Arc<Update>,
        ctx: TaskContext,
    ) -> Result<Disposition, BoxError>;
}

/// Invokes the handler registered for any other update, if there is one.
#[async_trait]
pub trait EventDispatch: Send + Sync {
    async fn dispatch_event(
        &self,
        update: Arc<Update>,
        ctx: TaskContext,
    ) -> Result<Disposition, BoxError>;
}
