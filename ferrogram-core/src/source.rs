//! # Ingestion Boundary
//!
//! Collaborators the ingestion loop talks to: the remote update stream and
//! the durable cursor store. Implementations (HTTP client, database) live
//! outside the engine.

use crate::error::{BoxError, FetchError};
use crate::update::{Update, UpdateType};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Parameters of one long-poll request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// First update id to return (`cursor + 1`).
    pub offset: i64,
    /// How long the remote side may hold the request waiting for new data.
    pub timeout: Duration,
    /// Maximum number of updates in one batch.
    pub limit: Option<u32>,
    /// Update types to receive; empty means the remote default.
    pub allowed_updates: Vec<UpdateType>,
}

/// The remote event stream.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Returns updates with `id >= request.offset`, in arrival order.
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<Update>, FetchError>;
}

#[async_trait]
impl<T: UpdateSource + ?Sized> UpdateSource for Arc<T> {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<Update>, FetchError> {
        (**self).fetch(request).await
    }
}

/// Durable storage of the last submitted update id.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// The last persisted cursor, or `0` when nothing was stored yet.
    async fn load(&self) -> Result<i64, BoxError>;

    async fn save(&self, cursor: i64) -> Result<(), BoxError>;
}

#[async_trait]
impl<T: CursorStore + ?Sized> CursorStore for Arc<T> {
    async fn load(&self) -> Result<i64, BoxError> {
        (**self).load().await
    }

    async fn save(&self, cursor: i64) -> Result<(), BoxError> {
        (**self).save(cursor).await
    }
}
