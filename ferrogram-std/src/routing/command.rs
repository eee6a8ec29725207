//! # Command Router
//!
//! Default [`CommandDispatch`] collaborator: parses `/name[@bot] args` and
//! invokes the handler registered for `name`.
//!
//! - Names match case-insensitively.
//! - A command addressed to another bot (`/start@other_bot`) is ignored.
//! - Each command may carry a [`RateLimitRule`] counted per command name.
//! - Unknown commands go to the fallback handler, or are reported as
//!   [`Disposition::Unrouted`].

use super::input::CommandInput;
use crate::ratelimit::{RateLimitRule, RateLimiter, command_key, configured_rule};
use async_trait::async_trait;
use ferrogram_core::{
    BoxError, CommandDispatch, Disposition, DynHandler, Handler, TaskContext, Update,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// A command split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lowercased name without the leading `/`.
    pub name: String,
    /// Bot username after `@`, if present.
    pub mention: Option<String>,
    /// Remainder of the text, trimmed.
    pub args: String,
}

impl ParsedCommand {
    /// Parses `text`, returning `None` when it is not a command for
    /// `bot_username`.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let body = text.strip_prefix('/')?;
        let (head, args) = match body.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (body, ""),
        };
        let (name, mention) = match head.split_once('@') {
            Some((name, mention)) => (name, Some(mention)),
            None => (head, None),
        };
        if name.is_empty() {
            return None;
        }
        if let (Some(mention), Some(bot)) = (mention, bot_username) {
            if !mention.eq_ignore_ascii_case(bot.trim_start_matches('@')) {
                return None;
            }
        }
        Some(Self {
            name: name.to_lowercase(),
            mention: mention.map(str::to_owned),
            args: args.to_owned(),
        })
    }

    /// Whitespace-separated arguments.
    pub fn arg_list(&self) -> impl Iterator<Item = &str> {
        self.args.split_whitespace()
    }
}

struct CommandEntry {
    handler: Arc<dyn DynHandler<CommandInput>>,
    limit: Option<RateLimitRule>,
    limit_key: String,
}

/// Builder for constructing a [`CommandRouter`].
pub struct CommandRouterBuilder {
    commands: HashMap<String, CommandEntry>,
    fallback: Option<Arc<dyn DynHandler<CommandInput>>>,
    rules: BTreeMap<String, RateLimitRule>,
    bot_username: Option<String>,
    limiter: Option<Arc<RateLimiter>>,
}

impl Default for CommandRouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRouterBuilder {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
            fallback: None,
            rules: BTreeMap::new(),
            bot_username: None,
            limiter: None,
        }
    }

    /// Registers `handler` for `/name`. A later registration replaces an
    /// earlier one.
    pub fn command<H: Handler<CommandInput>>(self, name: &str, handler: H) -> Self {
        self.insert(name, Arc::new(handler), None)
    }

    /// Registers `handler` for `/name` behind a rate limit.
    pub fn command_limited<H: Handler<CommandInput>>(
        self,
        name: &str,
        handler: H,
        rule: RateLimitRule,
    ) -> Self {
        self.insert(name, Arc::new(handler), Some(rule))
    }

    /// Registers an already type-erased handler.
    pub fn command_dyn(
        self,
        name: &str,
        handler: Arc<dyn DynHandler<CommandInput>>,
        rule: Option<RateLimitRule>,
    ) -> Self {
        self.insert(name, handler, rule)
    }

    /// Handler for commands nobody registered.
    pub fn fallback<H: Handler<CommandInput>>(mut self, handler: H) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }

    /// Rules for commands registered without one, keyed `command:<name>`
    /// or by the bare name.
    pub fn with_rules(mut self, rules: BTreeMap<String, RateLimitRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    fn insert(
        mut self,
        name: &str,
        handler: Arc<dyn DynHandler<CommandInput>>,
        limit: Option<RateLimitRule>,
    ) -> Self {
        let name = name.trim_start_matches('/').to_lowercase();
        let entry = CommandEntry {
            handler,
            limit,
            limit_key: command_key(&name),
        };
        self.commands.insert(name, entry);
        self
    }

    pub fn build(self) -> CommandRouter {
        let Self {
            mut commands,
            fallback,
            rules,
            bot_username,
            limiter,
        } = self;
        for (name, entry) in &mut commands {
            if entry.limit.is_none() {
                entry.limit = configured_rule(&rules, &entry.limit_key, name);
            }
        }
        CommandRouter {
            commands,
            fallback,
            bot_username,
            limiter: limiter.unwrap_or_default(),
        }
    }
}

/// Name-keyed command handlers.
pub struct CommandRouter {
    commands: HashMap<String, CommandEntry>,
    fallback: Option<Arc<dyn DynHandler<CommandInput>>>,
    bot_username: Option<String>,
    limiter: Arc<RateLimiter>,
}

impl Default for CommandRouter {
    fn default() -> Self {
        CommandRouterBuilder::new().build()
    }
}

impl CommandRouter {
    pub fn builder() -> CommandRouterBuilder {
        CommandRouterBuilder::new()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[async_trait]
impl CommandDispatch for CommandRouter {
    async fn dispatch_command(
        &self,
        update: Arc<Update>,
        ctx: TaskContext,
    ) -> Result<Disposition, BoxError> {
        let Some(command) = update
            .text()
            .and_then(|text| ParsedCommand::parse(text, self.bot_username.as_deref()))
        else {
            debug!("command addressed elsewhere");
            return Ok(Disposition::Unrouted);
        };

        let (handler, limit) = match self.commands.get(&command.name) {
            Some(entry) => (
                &entry.handler,
                entry.limit.as_ref().map(|rule| (&entry.limit_key, rule)),
            ),
            None => match &self.fallback {
                Some(fallback) => (fallback, None),
                None => {
                    debug!(command = %command.name, "unknown command");
                    return Ok(Disposition::Unrouted);
                }
            },
        };

        if let Some((key, rule)) = limit {
            if let Some(entity) = rule.scope().entity(&update) {
                if let Err(limited) = self.limiter.try_consume(key, rule, entity) {
                    return Ok(Disposition::RateLimited {
                        retry_after: limited.retry_after,
                    });
                }
            }
        }

        let name = command.name.clone();
        handler
            .call_dyn(CommandInput {
                update,
                command,
                ctx,
            })
            .await?;
        Ok(Disposition::Command(name))
    }
}
