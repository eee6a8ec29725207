//! # Callback Router
//!
//! Maps opaque button payloads to handlers through [`RouteTemplate`]s.
//!
//! Routes are ordered by specificity once, at build time:
//!
//! 1. fewer variables first (an exact literal route beats a parametric one);
//! 2. among equal variable counts, longer templates first;
//! 3. otherwise registration order.
//!
//! Resolution returns the first route whose template matches the whole
//! payload. The built router is immutable and needs no locking on lookup.
//!
//! # Example
//!
//! ```rust,ignore
//! let router = CallbackRouterBuilder::new()
//!     .register("store:buy:{item_id}", |input: CallbackInput| async move {
//!         let item: u64 = input.params.parse("item_id")?;
//!         buy(item).await
//!     })?
//!     .register_limited("store:refresh", refresh, RateLimitRule::per_user(1, Duration::from_secs(5)))?
//!     .build();
//! ```

use super::input::CallbackInput;
use super::template::{RouteParams, RouteTemplate};
use crate::ratelimit::{RateLimitRule, RateLimiter, callback_key, configured_rule};
use ferrogram_core::{
    BoxError, Disposition, DynHandler, Handler, RouteError, TaskContext, Update,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A template bound to its handler.
pub struct RouteEntry {
    template: RouteTemplate,
    name: Arc<str>,
    handler: Arc<dyn DynHandler<CallbackInput>>,
    limit: Option<RateLimitRule>,
    limit_key: String,
}

impl RouteEntry {
    pub fn template(&self) -> &RouteTemplate {
        &self.template
    }

    pub fn limit(&self) -> Option<&RateLimitRule> {
        self.limit.as_ref()
    }
}

/// A successful resolution.
pub struct RouteMatch<'a> {
    pub entry: &'a RouteEntry,
    pub params: RouteParams,
}

/// Builder for constructing a [`CallbackRouter`].
pub struct CallbackRouterBuilder {
    entries: Vec<RouteEntry>,
    rules: BTreeMap<String, RateLimitRule>,
    limiter: Option<Arc<RateLimiter>>,
}

impl Default for CallbackRouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRouterBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            rules: BTreeMap::new(),
            limiter: None,
        }
    }

    /// Registers `handler` for payloads matching `template`.
    pub fn register<H>(self, template: &str, handler: H) -> Result<Self, RouteError>
    where
        H: Handler<CallbackInput>,
    {
        self.insert(template, Arc::new(handler), None)
    }

    /// Registers `handler` behind a rate limit counted per route template.
    pub fn register_limited<H>(
        self,
        template: &str,
        handler: H,
        rule: RateLimitRule,
    ) -> Result<Self, RouteError>
    where
        H: Handler<CallbackInput>,
    {
        self.insert(template, Arc::new(handler), Some(rule))
    }

    /// Registers an already type-erased handler.
    pub fn register_dyn(
        self,
        template: &str,
        handler: Arc<dyn DynHandler<CallbackInput>>,
        rule: Option<RateLimitRule>,
    ) -> Result<Self, RouteError> {
        self.insert(template, handler, rule)
    }

    /// Rules for routes registered without one, keyed
    /// `callback:<template>` or by the bare template.
    pub fn with_rules(mut self, rules: BTreeMap<String, RateLimitRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Shares `limiter` instead of a private one.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    fn insert(
        mut self,
        template: &str,
        handler: Arc<dyn DynHandler<CallbackInput>>,
        limit: Option<RateLimitRule>,
    ) -> Result<Self, RouteError> {
        if self.entries.iter().any(|e| e.template.as_str() == template) {
            return Err(RouteError::InvalidTemplate {
                template: template.to_owned(),
                reason: "already registered".into(),
            });
        }
        let template = RouteTemplate::compile(template)?;
        self.entries.push(RouteEntry {
            name: template.as_str().into(),
            limit_key: callback_key(template.as_str()),
            template,
            handler,
            limit,
        });
        Ok(self)
    }

    /// Sorts routes by specificity and freezes the router.
    pub fn build(self) -> CallbackRouter {
        let Self {
            mut entries,
            rules,
            limiter,
        } = self;
        for entry in &mut entries {
            if entry.limit.is_none() {
                entry.limit =
                    configured_rule(&rules, &entry.limit_key, entry.template.as_str());
            }
        }
        // Stable: equally specific routes keep registration order.
        entries.sort_by(|a, b| {
            a.template
                .variable_count()
                .cmp(&b.template.variable_count())
                .then_with(|| b.template.as_str().len().cmp(&a.template.as_str().len()))
        });
        CallbackRouter {
            entries,
            limiter: limiter.unwrap_or_default(),
        }
    }
}

/// Immutable, specificity-ordered callback routes.
pub struct CallbackRouter {
    entries: Vec<RouteEntry>,
    limiter: Arc<RateLimiter>,
}

impl Default for CallbackRouter {
    fn default() -> Self {
        CallbackRouterBuilder::new().build()
    }
}

impl CallbackRouter {
    pub fn builder() -> CallbackRouterBuilder {
        CallbackRouterBuilder::new()
    }

    /// First route matching the whole `payload`, or `None` (no route).
    pub fn resolve(&self, payload: &str) -> Option<RouteMatch<'_>> {
        self.entries.iter().find_map(|entry| {
            entry
                .template
                .matches(payload)
                .map(|params| RouteMatch { entry, params })
        })
    }

    /// Templates in resolution order.
    pub fn templates(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.template.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves the update's callback payload and runs the matching handler,
    /// subject to the route's rate limit.
    pub async fn dispatch(
        &self,
        update: Arc<Update>,
        ctx: TaskContext,
    ) -> Result<Disposition, BoxError> {
        let Some(payload) = update.callback_data() else {
            return Ok(Disposition::Unrouted);
        };
        let Some(RouteMatch { entry, params }) = self.resolve(payload) else {
            debug!(payload, "no callback route");
            return Ok(Disposition::Unrouted);
        };

        if let Some(rule) = &entry.limit {
            if let Some(entity) = rule.scope().entity(&update) {
                if let Err(limited) = self.limiter.try_consume(&entry.limit_key, rule, entity) {
                    return Ok(Disposition::RateLimited {
                        retry_after: limited.retry_after,
                    });
                }
            }
        }

        let input = CallbackInput {
            update: update.clone(),
            params,
            template: entry.name.clone(),
            ctx,
        };
        entry.handler.call_dyn(input).await?;
        Ok(Disposition::Callback(entry.name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::LimitScope;
    use crate::testing::RecordingHandler;
    use ferrogram_core::{CallbackQuery, UpdateKind, User};
    use std::time::Duration;

    fn noop() -> impl Handler<CallbackInput> {
        |_: CallbackInput| async {}
    }

    fn press(id: i64, user: i64, data: &str) -> Arc<Update> {
        Arc::new(Update::new(
            id,
            UpdateKind::CallbackQuery(CallbackQuery {
                id: format!("q{id}"),
                from: User::new(user),
                message: None,
                data: Some(data.into()),
            }),
        ))
    }

    fn template_of(router: &CallbackRouter, payload: &str) -> Option<String> {
        router
            .resolve(payload)
            .map(|m| m.entry.template().as_str().to_owned())
    }

    #[test]
    fn literal_route_wins_over_parametric() {
        let router = CallbackRouterBuilder::new()
            .register("a:{x}:{y}", noop())
            .unwrap()
            .register("a:{x}", noop())
            .unwrap()
            .register("a:b", noop())
            .unwrap()
            .build();

        assert_eq!(template_of(&router, "a:b").as_deref(), Some("a:b"));
        assert_eq!(template_of(&router, "a:c").as_deref(), Some("a:{x}"));
        assert_eq!(template_of(&router, "a:c:d").as_deref(), Some("a:{x}"));
        assert_eq!(
            router.templates().collect::<Vec<_>>(),
            vec!["a:b", "a:{x}", "a:{x}:{y}"]
        );
    }

    #[test]
    fn longer_template_wins_among_equal_variable_counts() {
        let router = CallbackRouterBuilder::new()
            .register("{x}", noop())
            .unwrap()
            .register("item:{id}", noop())
            .unwrap()
            .build();
        let matched = router.resolve("item:7").unwrap();
        assert_eq!(matched.entry.template().as_str(), "item:{id}");
        assert_eq!(matched.params.get("id"), Some("7"));
    }

    #[test]
    fn unmatched_payload_is_no_route() {
        let router = CallbackRouterBuilder::new()
            .register("item:{id}:view", noop())
            .unwrap()
            .build();
        assert!(router.resolve("item:view").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let result = CallbackRouterBuilder::new()
            .register("x", noop())
            .unwrap()
            .register("x", noop());
        assert!(matches!(result, Err(RouteError::InvalidTemplate { .. })));
    }

    #[tokio::test]
    async fn dispatch_runs_handler_with_params() {
        let recorder = RecordingHandler::new();
        let router = CallbackRouterBuilder::new()
            .register("store:buy:{item}", recorder.clone())
            .unwrap()
            .build();

        let update = press(1, 5, "store:buy:apple");
        let ctx = TaskContext::for_update(&update, update.affinity_key());
        let disposition = router.dispatch(update, ctx).await.unwrap();

        assert_eq!(disposition, Disposition::Callback("store:buy:{item}".into()));
        let inputs = recorder.inputs();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].params.get("item"), Some("apple"));
    }

    #[tokio::test(start_paused = true)]
    async fn limited_route_rejects_over_capacity() {
        let recorder = RecordingHandler::new();
        let router = CallbackRouterBuilder::new()
            .register_limited(
                "spin",
                recorder.clone(),
                RateLimitRule::per_user(1, Duration::from_secs(10)),
            )
            .unwrap()
            .build();

        let first = press(1, 5, "spin");
        let ctx = TaskContext::for_update(&first, None);
        assert_eq!(
            router.dispatch(first, ctx).await.unwrap(),
            Disposition::Callback("spin".into())
        );

        let second = press(2, 5, "spin");
        let ctx = TaskContext::for_update(&second, None);
        assert!(matches!(
            router.dispatch(second, ctx).await.unwrap(),
            Disposition::RateLimited { .. }
        ));

        let other_user = press(3, 6, "spin");
        let ctx = TaskContext::for_update(&other_user, None);
        assert!(matches!(
            router.dispatch(other_user, ctx).await.unwrap(),
            Disposition::Callback(_)
        ));
        assert_eq!(recorder.count(), 2);
    }

    #[test]
    fn configured_rules_apply_by_template() {
        let mut rules = BTreeMap::new();
        rules.insert(
            "vote:{id}".to_owned(),
            RateLimitRule::per_user(1, Duration::from_secs(60)),
        );
        rules.insert(
            "callback:spin".to_owned(),
            RateLimitRule::per_chat(3, Duration::from_secs(5)),
        );
        rules.insert(
            "command:help".to_owned(),
            RateLimitRule::per_user(1, Duration::from_secs(5)),
        );
        let router = CallbackRouterBuilder::new()
            .register("vote:{id}", noop())
            .unwrap()
            .register("spin", noop())
            .unwrap()
            .register("help", noop())
            .unwrap()
            .with_rules(rules)
            .build();

        assert!(router.resolve("vote:1").unwrap().entry.limit().is_some());
        assert_eq!(
            router.resolve("spin").unwrap().entry.limit().map(|r| r.scope()),
            Some(LimitScope::Chat)
        );
        // Command rules never reach a callback route of the same name.
        assert!(router.resolve("help").unwrap().entry.limit().is_none());
    }
}
