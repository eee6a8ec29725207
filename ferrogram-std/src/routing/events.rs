//! Default [`EventDispatch`] collaborator: handlers keyed by [`UpdateType`].

use super::input::EventInput;
use async_trait::async_trait;
use ferrogram_core::{
    BoxError, Disposition, DynHandler, EventDispatch, Handler, TaskContext, Update, UpdateType,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for constructing an [`EventRouter`].
#[derive(Default)]
pub struct EventRouterBuilder {
    handlers: HashMap<UpdateType, Arc<dyn DynHandler<EventInput>>>,
    fallback: Option<Arc<dyn DynHandler<EventInput>>>,
}

impl EventRouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for updates of `kind`.
    pub fn on<H: Handler<EventInput>>(mut self, kind: UpdateType, handler: H) -> Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Handler for every update type without its own handler.
    pub fn fallback<H: Handler<EventInput>>(mut self, handler: H) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> EventRouter {
        EventRouter {
            handlers: self.handlers,
            fallback: self.fallback,
        }
    }
}

/// Update-type keyed handlers.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<UpdateType, Arc<dyn DynHandler<EventInput>>>,
    fallback: Option<Arc<dyn DynHandler<EventInput>>>,
}

impl EventRouter {
    pub fn builder() -> EventRouterBuilder {
        EventRouterBuilder::new()
    }

    pub fn handles(&self, kind: &UpdateType) -> bool {
        self.handlers.contains_key(kind) || self.fallback.is_some()
    }
}

#[async_trait]
impl EventDispatch for EventRouter {
    async fn dispatch_event(
        &self,
        update: Arc<Update>,
        ctx: TaskContext,
    ) -> Result<Disposition, BoxError> {
        let kind = update.update_type();
        let Some(handler) = self.handlers.get(&kind).or(self.fallback.as_ref()) else {
            return Ok(Disposition::Unrouted);
        };
        handler.call_dyn(EventInput { update, ctx }).await?;
        Ok(Disposition::Event(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingHandler;
    use ferrogram_core::{InlineQuery, UpdateKind, User};

    fn inline(id: i64) -> Arc<Update> {
        Arc::new(Update::new(
            id,
            UpdateKind::InlineQuery(InlineQuery {
                id: format!("iq{id}"),
                from: User::new(1),
                query: "cats".into(),
            }),
        ))
    }

    #[tokio::test]
    async fn routes_by_update_type() {
        let recorder = RecordingHandler::new();
        let router = EventRouter::builder()
            .on(UpdateType::InlineQuery, recorder.clone())
            .build();

        let update = inline(1);
        let ctx = TaskContext::for_update(&update, None);
        let disposition = router.dispatch_event(update, ctx).await.unwrap();
        assert_eq!(disposition, Disposition::Event(UpdateType::InlineQuery));
        assert_eq!(recorder.count(), 1);
    }

    #[tokio::test]
    async fn unregistered_type_is_unrouted_without_fallback() {
        let router = EventRouter::builder().build();
        let update = inline(2);
        let ctx = TaskContext::for_update(&update, None);
        assert_eq!(
            router.dispatch_event(update, ctx).await.unwrap(),
            Disposition::Unrouted
        );
    }

    #[tokio::test]
    async fn fallback_catches_everything_else() {
        let fallback = RecordingHandler::new();
        let router = EventRouter::builder().fallback(fallback.clone()).build();
        let update = inline(3);
        let ctx = TaskContext::for_update(&update, None);
        router.dispatch_event(update, ctx).await.unwrap();
        assert_eq!(fallback.count(), 1);
    }
}
