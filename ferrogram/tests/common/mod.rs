#![allow(dead_code)]

use ferrogram::{
    BoxError, CallbackQuery, Chat, ExecutorConfig, InlineQuery, Message, Task, TaskContext,
    Update, UpdateKind, User,
};
use std::time::Duration;

// ============================================================================
// Update Builders
// ============================================================================

pub fn text(id: i64, user: i64, text: &str) -> Update {
    Update::new(
        id,
        UpdateKind::Message(Message::text(id, User::new(user), text)),
    )
}

pub fn group_text(id: i64, user: i64, chat: i64, text: &str) -> Update {
    let mut message = Message::text(id, User::new(user), text);
    message.chat = Chat::group(chat);
    Update::new(id, UpdateKind::Message(message))
}

pub fn callback(id: i64, user: i64, data: &str) -> Update {
    Update::new(
        id,
        UpdateKind::CallbackQuery(CallbackQuery {
            id: format!("cb-{id}"),
            from: User::new(user),
            message: None,
            data: Some(data.into()),
        }),
    )
}

pub fn inline(id: i64, user: i64, query: &str) -> Update {
    Update::new(
        id,
        UpdateKind::InlineQuery(InlineQuery {
            id: format!("iq-{id}"),
            from: User::new(user),
            query: query.into(),
        }),
    )
}

// ============================================================================
// Executor Helpers
// ============================================================================

pub fn executor_config(lanes: usize, queue_capacity: usize) -> ExecutorConfig {
    ExecutorConfig::default()
        .with_lanes(lanes)
        .with_queue_capacity(queue_capacity)
        .with_shutdown_grace(Duration::from_secs(5))
}

pub fn task<F>(label: &str, future: F) -> Task
where
    F: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Task::new(TaskContext::detached(label, None), future)
}
