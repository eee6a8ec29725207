//! # Task Context
//!
//! Request-scoped context captured when an update is submitted to the
//! executor and carried explicitly into the task that handles it.
//!
//! The context owns a [`tracing::Span`] created under whatever span was
//! current at submission time. The executor instruments the task future with
//! that span, so it is entered only while the task is being polled on its lane
//! and exited afterwards, whether the task succeeds, fails or panics.

use crate::update::{AffinityKey, Update};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Span, field};

/// Context attached to a single executor task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    correlation_id: Arc<str>,
    update_id: Option<i64>,
    key: Option<AffinityKey>,
    submitted_at: Instant,
    span: Span,
}

impl TaskContext {
    /// Context for handling `update`, keyed by `key`.
    pub fn for_update(update: &Update, key: Option<AffinityKey>) -> Self {
        let correlation_id: Arc<str> = format!("upd-{}", update.id).into();
        let span = tracing::info_span!(
            "update",
            correlation_id = %correlation_id,
            update_id = update.id,
            kind = %update.update_type(),
            key = field::Empty,
            lane = field::Empty,
        );
        if let Some(key) = &key {
            span.record("key", field::display(key));
        }
        Self {
            correlation_id,
            update_id: Some(update.id),
            key,
            submitted_at: Instant::now(),
            span,
        }
    }

    /// Context for a task not tied to an update.
    pub fn detached(label: &str, key: Option<AffinityKey>) -> Self {
        let correlation_id: Arc<str> = label.into();
        let span = tracing::info_span!(
            "task",
            correlation_id = %correlation_id,
            key = field::Empty,
            lane = field::Empty,
        );
        if let Some(key) = &key {
            span.record("key", field::display(key));
        }
        Self {
            correlation_id,
            update_id: None,
            key,
            submitted_at: Instant::now(),
            span,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn update_id(&self) -> Option<i64> {
        self.update_id
    }

    pub fn key(&self) -> Option<&AffinityKey> {
        self.key.as_ref()
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Records the lane the task was placed on.
    pub fn record_lane(&self, lane: usize) {
        self.span.record("lane", lane);
    }
}
