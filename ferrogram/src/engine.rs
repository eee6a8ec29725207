//! # Engine
//!
//! Wires every component into a running bot:
//!
//! ```text
//! UpdateSource ─▶ IngestionLoop ─▶ EventProcessor ─▶ ShardedExecutor lanes
//!                      │               │ pre-hooks        │ Command / Callback / Event routers
//!                 CursorStore          └──────────────────┴─▶ post-hooks
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = Engine::builder()
//!     .config(EngineConfig::load(Some(Path::new("bot.toml")))?)
//!     .source(HttpSource::new(token))
//!     .cursor_store(PgCursorStore::new(pool))
//!     .interceptor(LoggingInterceptor)
//!     .command("start", start)
//!     .callback("store:buy:{item_id}", buy)
//!     .on(UpdateType::PreCheckoutQuery, confirm_payment)
//!     .build()?;
//!
//! engine.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

use ferrogram_core::{
    CommandDispatch, CursorStore, DynHandler, DynInterceptor, EventDispatch, FerrogramError,
    Handler, UpdateSource, UpdateType,
};
use ferrogram_std::{
    CallbackInput, CallbackRouterBuilder, CommandInput, CommandRouterBuilder, EngineConfig,
    EventInput, EventProcessor, EventRouterBuilder, ExecutorStats, IngestionLoop,
    InterceptorChainBuilder, RateLimitRule, RateLimiter, ShardedExecutor,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

struct PendingRoute {
    template: String,
    handler: Arc<dyn DynHandler<CallbackInput>>,
    limit: Option<RateLimitRule>,
}

/// Builder for constructing an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    source: Option<Arc<dyn UpdateSource>>,
    cursor_store: Option<Arc<dyn CursorStore>>,
    interceptors: InterceptorChainBuilder,
    commands: CommandRouterBuilder,
    command_dispatch: Option<Arc<dyn CommandDispatch>>,
    routes: Vec<PendingRoute>,
    events: EventRouterBuilder,
    event_dispatch: Option<Arc<dyn EventDispatch>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            source: None,
            cursor_store: None,
            interceptors: InterceptorChainBuilder::new(),
            commands: CommandRouterBuilder::new(),
            command_dispatch: None,
            routes: Vec::new(),
            events: EventRouterBuilder::new(),
            event_dispatch: None,
        }
    }
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// The remote update stream. Required.
    pub fn source<S: UpdateSource + 'static>(mut self, source: S) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn source_arc(mut self, source: Arc<dyn UpdateSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Durable cursor storage. Required.
    pub fn cursor_store<C: CursorStore + 'static>(mut self, store: C) -> Self {
        self.cursor_store = Some(Arc::new(store));
        self
    }

    pub fn cursor_store_arc(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.cursor_store = Some(store);
        self
    }

    /// Appends an interceptor; registration order is execution order.
    pub fn interceptor<I: DynInterceptor>(mut self, interceptor: I) -> Self {
        self.interceptors = self.interceptors.register(interceptor);
        self
    }

    pub fn command<H: Handler<CommandInput>>(mut self, name: &str, handler: H) -> Self {
        self.commands = self.commands.command(name, handler);
        self
    }

    pub fn command_limited<H: Handler<CommandInput>>(
        mut self,
        name: &str,
        handler: H,
        rule: RateLimitRule,
    ) -> Self {
        self.commands = self.commands.command_limited(name, handler, rule);
        self
    }

    /// Handler for unknown commands.
    pub fn command_fallback<H: Handler<CommandInput>>(mut self, handler: H) -> Self {
        self.commands = self.commands.fallback(handler);
        self
    }

    /// Replaces the built-in command router.
    pub fn command_dispatch<C: CommandDispatch + 'static>(mut self, dispatch: C) -> Self {
        self.command_dispatch = Some(Arc::new(dispatch));
        self
    }

    /// Registers a callback route. Templates are validated by [`build`](Self::build).
    pub fn callback<H: Handler<CallbackInput>>(mut self, template: &str, handler: H) -> Self {
        self.routes.push(PendingRoute {
            template: template.to_owned(),
            handler: Arc::new(handler),
            limit: None,
        });
        self
    }

    pub fn callback_limited<H: Handler<CallbackInput>>(
        mut self,
        template: &str,
        handler: H,
        rule: RateLimitRule,
    ) -> Self {
        self.routes.push(PendingRoute {
            template: template.to_owned(),
            handler: Arc::new(handler),
            limit: Some(rule),
        });
        self
    }

    /// Handler for every update of `kind` that is neither a command nor a
    /// callback payload.
    pub fn on<H: Handler<EventInput>>(mut self, kind: UpdateType, handler: H) -> Self {
        self.events = self.events.on(kind, handler);
        self
    }

    pub fn event_fallback<H: Handler<EventInput>>(mut self, handler: H) -> Self {
        self.events = self.events.fallback(handler);
        self
    }

    /// Replaces the built-in event router.
    pub fn event_dispatch<E: EventDispatch + 'static>(mut self, dispatch: E) -> Self {
        self.event_dispatch = Some(Arc::new(dispatch));
        self
    }

    /// Validates the configuration, compiles routes and starts the executor.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<Engine, FerrogramError> {
        let Self {
            config,
            source,
            cursor_store,
            interceptors,
            commands,
            command_dispatch,
            routes,
            events,
            event_dispatch,
        } = self;

        config.validate()?;
        let source = source.ok_or(FerrogramError::Missing("update source"))?;
        let cursor_store = cursor_store.ok_or(FerrogramError::Missing("cursor store"))?;

        let limiter = Arc::new(RateLimiter::new());
        let rules: BTreeMap<String, RateLimitRule> = config
            .rate_limits
            .rules
            .iter()
            .map(|(name, rule)| (name.clone(), rule.to_rule()))
            .collect();

        let mut callbacks = CallbackRouterBuilder::new()
            .with_rules(rules.clone())
            .with_limiter(limiter.clone());
        for route in routes {
            callbacks = callbacks.register_dyn(&route.template, route.handler, route.limit)?;
        }
        let callbacks = callbacks.build();

        let command_dispatch = match command_dispatch {
            Some(dispatch) => dispatch,
            None => {
                let mut commands = commands.with_rules(rules).with_limiter(limiter.clone());
                if let Some(username) = &config.bot_username {
                    commands = commands.bot_username(username.clone());
                }
                Arc::new(commands.build())
            }
        };
        let event_dispatch = match event_dispatch {
            Some(dispatch) => dispatch,
            None => Arc::new(events.build()),
        };

        let executor =
            ShardedExecutor::start(&config.executor).map_err(FerrogramError::Executor)?;
        let processor = EventProcessor::builder(executor.clone())
            .interceptors(interceptors.build())
            .commands_arc(command_dispatch)
            .callbacks(callbacks)
            .events_arc(event_dispatch)
            .build();
        let ingestion = Arc::new(IngestionLoop::new(
            source,
            cursor_store,
            Arc::new(processor),
            config.ingestion.clone(),
        ));

        Ok(Engine {
            config,
            executor,
            ingestion,
            limiter,
        })
    }
}

/// A fully wired update dispatch engine.
pub struct Engine {
    config: EngineConfig,
    executor: Arc<ShardedExecutor>,
    ingestion: Arc<IngestionLoop>,
    limiter: Arc<RateLimiter>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<ShardedExecutor> {
        &self.executor
    }

    pub fn ingestion(&self) -> &Arc<IngestionLoop> {
        &self.ingestion
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    /// Requests a cooperative stop of ingestion; [`run`](Self::run) then
    /// drains the executor and returns.
    pub fn stop(&self) {
        self.ingestion.stop();
    }

    /// Runs ingestion until it stops or fails fatally, then shuts the
    /// executor down within the configured grace period.
    pub async fn run(&self) -> Result<(), FerrogramError> {
        let sweeper = self
            .limiter
            .spawn_sweeper(self.config.rate_limits.sweep_interval());
        info!(lanes = self.executor.lane_count(), "engine running");

        let result = self.ingestion.run().await;

        sweeper.abort();
        let report = self.executor.shutdown().await;
        info!(
            drained = report.drained.len(),
            aborted = report.aborted.len(),
            "engine stopped"
        );
        result.map_err(FerrogramError::from)
    }

    /// Like [`run`](Self::run), stopping ingestion once `signal` resolves.
    pub async fn run_until<F>(&self, signal: F) -> Result<(), FerrogramError>
    where
        F: Future<Output = ()>,
    {
        let run = self.run();
        tokio::pin!(run);
        tokio::select! {
            biased;
            result = &mut run => return result,
            () = signal => {
                info!("shutdown signal received");
                self.stop();
            }
        }
        run.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrogram_core::{CallbackQuery, InlineQuery, Message, Update, UpdateKind, User};
    use ferrogram_std::testing::{MemoryCursorStore, RecordingHandler, ScriptedSource};
    use ferrogram_std::{IngestionState, RuleConfig};

    fn command(id: i64, user: i64, text: &str) -> Update {
        Update::new(
            id,
            UpdateKind::Message(Message::text(id, User::new(user), text)),
        )
    }

    fn callback(id: i64, user: i64, data: &str) -> Update {
        Update::new(
            id,
            UpdateKind::CallbackQuery(CallbackQuery {
                id: id.to_string(),
                from: User::new(user),
                message: None,
                data: Some(data.into()),
            }),
        )
    }

    fn inline(id: i64, user: i64) -> Update {
        Update::new(
            id,
            UpdateKind::InlineQuery(InlineQuery {
                id: id.to_string(),
                from: User::new(user),
                query: "cats".into(),
            }),
        )
    }

    #[tokio::test]
    async fn missing_source_is_reported() {
        let result = Engine::builder()
            .cursor_store(MemoryCursorStore::default())
            .build();
        assert!(matches!(
            result,
            Err(FerrogramError::Missing("update source"))
        ));
    }

    #[tokio::test]
    async fn invalid_template_fails_build() {
        let result = Engine::builder()
            .source(ScriptedSource::new())
            .cursor_store(MemoryCursorStore::default())
            .callback("item:{id", RecordingHandler::<CallbackInput>::new())
            .build();
        assert!(matches!(result, Err(FerrogramError::Route(_))));
    }

    #[tokio::test]
    async fn invalid_config_fails_build() {
        let mut config = EngineConfig::default();
        config.executor.lanes = 0;
        let result = Engine::builder()
            .config(config)
            .source(ScriptedSource::new())
            .cursor_store(MemoryCursorStore::default())
            .build();
        assert!(matches!(result, Err(FerrogramError::Config(_))));
    }

    #[tokio::test]
    async fn routes_every_shape_and_drains_on_stop() {
        let source = Arc::new(ScriptedSource::new());
        source.push_batch(vec![
            command(1, 7, "/start now"),
            callback(2, 7, "item:42:view"),
            inline(3, 8),
        ]);
        let store = Arc::new(MemoryCursorStore::new(0));
        let commands = RecordingHandler::<CommandInput>::new();
        let callbacks = RecordingHandler::<CallbackInput>::new();
        let events = RecordingHandler::<EventInput>::new();

        let engine = Engine::builder()
            .source_arc(source.clone())
            .cursor_store_arc(store.clone())
            .command("start", commands.clone())
            .callback("item:{id}:view", callbacks.clone())
            .on(UpdateType::InlineQuery, events.clone())
            .build()
            .unwrap();

        engine.run_until(source.wait_exhausted()).await.unwrap();

        assert_eq!(commands.inputs()[0].args(), "now");
        assert_eq!(callbacks.inputs()[0].params.get("id"), Some("42"));
        assert_eq!(events.count(), 1);
        assert_eq!(store.current(), 3);
        assert_eq!(engine.ingestion().state(), IngestionState::Stopped);
        assert!(!engine.executor().is_accepting());
    }

    #[tokio::test]
    async fn configured_rules_apply_to_commands() {
        let mut config = EngineConfig::default();
        config.rate_limits.rules.insert(
            "command:start".into(),
            RuleConfig {
                capacity: 1,
                window_ms: 60_000,
                scope: Default::default(),
            },
        );
        let source = Arc::new(ScriptedSource::new());
        source.push_batch(vec![command(1, 7, "/start"), command(2, 7, "/start")]);
        let commands = RecordingHandler::<CommandInput>::new();

        let engine = Engine::builder()
            .config(config)
            .source_arc(source.clone())
            .cursor_store(MemoryCursorStore::default())
            .command("start", commands.clone())
            .build()
            .unwrap();

        engine.run_until(source.wait_exhausted()).await.unwrap();

        assert_eq!(commands.count(), 1);
        assert_eq!(engine.rate_limiter().len(), 1);
    }
}
