//! # Rate Limiting
//!
//! Per-`(rule, entity)` token buckets guarding commands and callback routes.
//!
//! A [`RateLimitRule`] allows `capacity` operations per `window`, refilling
//! continuously. The entity is the user or chat selected by the rule's
//! [`LimitScope`]. Buckets are created lazily on first use and swept once
//! they have been idle for two full windows; a bucket removed while in use
//! simply starts over as full.
//!
//! Rule keys are namespaced by what they guard, `command:<name>` or
//! `callback:<template>`, so a command and a callback route sharing a name
//! never share a bucket. A bucket is also bound to the rule it was created
//! with: the same key under a different rule counts separately.
//!
//! # Example
//!
//! ```rust,ignore
//! let limiter = RateLimiter::new();
//! let rule = RateLimitRule::new(5, Duration::from_secs(10), LimitScope::User);
//!
//! match limiter.try_consume(&command_key("buy"), &rule, user_id) {
//!     Ok(()) => { /* run the handler */ }
//!     Err(limited) => tracing::debug!(retry_after = ?limited.retry_after, "throttled"),
//! }
//! ```

mod bucket;

pub use bucket::TokenBucket;

use dashmap::DashMap;
use ferrogram_core::Update;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Which identity a rule counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    /// The user who caused the update.
    #[default]
    User,
    /// The conversation the update belongs to.
    Chat,
}

impl LimitScope {
    /// Entity id of `update` under this scope.
    pub fn entity(&self, update: &Update) -> Option<i64> {
        match self {
            LimitScope::User => update.sender().map(|user| user.id),
            LimitScope::Chat => update.chat().map(|chat| chat.id),
        }
    }
}

/// Rule key guarding the command `/name`.
pub fn command_key(name: &str) -> String {
    format!("command:{name}")
}

/// Rule key guarding the callback route `template`.
pub fn callback_key(template: &str) -> String {
    format!("callback:{template}")
}

/// Configured rule for `key`, falling back to the unqualified `name`.
pub(crate) fn configured_rule(
    rules: &BTreeMap<String, RateLimitRule>,
    key: &str,
    name: &str,
) -> Option<RateLimitRule> {
    rules.get(key).or_else(|| rules.get(name)).copied()
}

/// `capacity` operations per `window` for each entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimitRule {
    capacity: u32,
    window: Duration,
    scope: LimitScope,
}

impl RateLimitRule {
    pub fn new(capacity: u32, window: Duration, scope: LimitScope) -> Self {
        Self {
            capacity,
            window,
            scope,
        }
    }

    pub fn per_user(capacity: u32, window: Duration) -> Self {
        Self::new(capacity, window, LimitScope::User)
    }

    pub fn per_chat(capacity: u32, window: Duration) -> Self {
        Self::new(capacity, window, LimitScope::Chat)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn scope(&self) -> LimitScope {
        self.scope
    }
}

/// A consume attempt was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("rate limited, retry after {retry_after:?}")]
pub struct RateLimited {
    /// Time until at least one token is available.
    pub retry_after: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    rule: String,
    limit: RateLimitRule,
    entity: i64,
}

struct Entry {
    bucket: TokenBucket,
    /// Buckets idle for longer than this are swept.
    idle_after: Duration,
}

/// Concurrent registry of token buckets.
pub struct RateLimiter {
    buckets: DashMap<BucketKey, Entry>,
    epoch: Instant,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            epoch: Instant::now(),
        }
    }

    fn now(&self) -> Duration {
        Instant::now().saturating_duration_since(self.epoch)
    }

    /// Spends one token of `entity`'s bucket for `rule_key`.
    pub fn try_consume(
        &self,
        rule_key: &str,
        rule: &RateLimitRule,
        entity: i64,
    ) -> Result<(), RateLimited> {
        let now = self.now();
        let key = BucketKey {
            rule: rule_key.to_owned(),
            limit: *rule,
            entity,
        };

        let result = match self.buckets.get(&key) {
            Some(entry) => entry.bucket.try_consume(now),
            None => self
                .buckets
                .entry(key)
                .or_insert_with(|| Entry {
                    bucket: TokenBucket::new(rule, now),
                    idle_after: rule.window().saturating_mul(2),
                })
                .bucket
                .try_consume(now),
        };

        result.map_err(|retry_after| {
            debug!(rule = rule_key, entity, ?retry_after, "rate limit exceeded");
            RateLimited { retry_after }
        })
    }

    /// Tokens currently available; a missing bucket is reported as full.
    pub fn available(&self, rule_key: &str, rule: &RateLimitRule, entity: i64) -> u32 {
        let key = BucketKey {
            rule: rule_key.to_owned(),
            limit: *rule,
            entity,
        };
        self.buckets
            .get(&key)
            .map_or(rule.capacity(), |entry| entry.bucket.available(self.now()))
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Removes buckets idle for more than two windows. Returns how many.
    pub fn sweep(&self) -> usize {
        let now = self.now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, entry| !entry.bucket.is_idle(now, entry.idle_after));
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "swept idle rate limit buckets");
        }
        removed
    }

    /// Sweeps every `interval` until the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match limiter.upgrade() {
                    Some(limiter) => {
                        limiter.sweep();
                    }
                    None => break,
                }
            }
        })
    }
}
