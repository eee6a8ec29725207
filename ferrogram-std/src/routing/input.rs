//! Inputs handed to routed handlers.

use super::command::ParsedCommand;
use super::template::RouteParams;
use ferrogram_core::{CallbackQuery, Event, Message, TaskContext, Update, UpdateKind};
use std::sync::Arc;

/// A parsed bot command.
#[derive(Debug, Clone)]
pub struct CommandInput {
    pub update: Arc<Update>,
    pub command: ParsedCommand,
    pub ctx: TaskContext,
}

impl CommandInput {
    pub fn name(&self) -> &str {
        &self.command.name
    }

    /// Everything after the command name, trimmed.
    pub fn args(&self) -> &str {
        &self.command.args
    }

    pub fn message(&self) -> Option<&Message> {
        match &self.update.kind {
            UpdateKind::Message(m) => Some(m),
            _ => None,
        }
    }
}

impl Event for CommandInput {}

/// A button press resolved to a callback route.
#[derive(Debug, Clone)]
pub struct CallbackInput {
    pub update: Arc<Update>,
    pub params: RouteParams,
    /// Template of the matched route.
    pub template: Arc<str>,
    pub ctx: TaskContext,
}

impl CallbackInput {
    pub fn query(&self) -> Option<&CallbackQuery> {
        match &self.update.kind {
            UpdateKind::CallbackQuery(q) => Some(q),
            _ => None,
        }
    }

    pub fn data(&self) -> Option<&str> {
        self.update.callback_data()
    }
}

impl Event for CallbackInput {}

/// Any other update.
#[derive(Debug, Clone)]
pub struct EventInput {
    pub update: Arc<Update>,
    pub ctx: TaskContext,
}

impl Event for EventInput {}
