//! # Engine Configuration
//!
//! Serde-deserializable settings for every engine component. Every field has
//! a default, so an empty file (or no file at all) yields a working engine.
//!
//! [`EngineConfig::load`] layers an optional file (format picked from the
//! extension) under `FERROGRAM__*` environment variables, for example
//! `FERROGRAM__EXECUTOR__LANES=8`.

use crate::ratelimit::{LimitScope, RateLimitRule};
use ferrogram_core::{ConfigError, UpdateType};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// How each executor lane is run.
///
/// Lanes only isolate keys from each other while handlers yield at `.await`
/// points. A handler that blocks its thread (synchronous I/O, long CPU work)
/// under [`LaneStrategy::Task`] holds a runtime worker, and with it every
/// other lane scheduled there. Such handlers belong on
/// [`LaneStrategy::Thread`], or should wrap the blocking part in
/// `tokio::task::spawn_blocking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneStrategy {
    /// A Tokio task on the ambient runtime. Handlers must not block.
    #[default]
    Task,
    /// A dedicated OS thread driving its own current-thread runtime. Use when
    /// handlers perform blocking I/O.
    Thread,
}

/// Settings for the sharded executor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of lanes.
    pub lanes: usize,
    /// Bounded queue length per lane.
    pub queue_capacity: usize,
    /// Maximum number of sticky affinity keys.
    pub affinity_capacity: usize,
    /// Drain window granted to each lane on shutdown.
    pub shutdown_grace_ms: u64,
    pub strategy: LaneStrategy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let lanes = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .max(2);
        Self {
            lanes,
            queue_capacity: 1024,
            affinity_capacity: 10_000,
            shutdown_grace_ms: 5_000,
            strategy: LaneStrategy::Task,
        }
    }
}

impl ExecutorConfig {
    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_affinity_capacity(mut self, capacity: usize) -> Self {
        self.affinity_capacity = capacity;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_strategy(mut self, strategy: LaneStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lanes == 0 {
            return Err(ConfigError::Invalid("executor.lanes must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "executor.queue_capacity must be at least 1".into(),
            ));
        }
        if self.affinity_capacity == 0 {
            return Err(ConfigError::Invalid(
                "executor.affinity_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for the long-poll ingestion loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// How long the remote side may hold a long-poll.
    pub poll_timeout_secs: u64,
    /// Maximum updates per batch.
    pub batch_limit: Option<u32>,
    /// Update types to request; empty means the remote default.
    pub allowed_updates: Vec<String>,
    /// Pause before re-offering an update to a saturated lane.
    pub backpressure_delay_ms: u64,
    /// First delay after a transient transport failure; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Upper bound for every retry delay.
    pub backoff_max_ms: u64,
    /// Fixed delay after a non-fatal remote error response.
    pub remote_error_delay_ms: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 30,
            batch_limit: None,
            allowed_updates: Vec::new(),
            backpressure_delay_ms: 50,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            remote_error_delay_ms: 5_000,
        }
    }
}

impl IngestionConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn backpressure_delay(&self) -> Duration {
        Duration::from_millis(self.backpressure_delay_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn remote_error_delay(&self) -> Duration {
        Duration::from_millis(self.remote_error_delay_ms)
    }

    /// Parses `allowed_updates` into update types.
    pub fn allowed_update_types(&self) -> Vec<UpdateType> {
        self.allowed_updates
            .iter()
            .map(|name| match name.as_str() {
                "message" => UpdateType::Message,
                "edited_message" => UpdateType::EditedMessage,
                "channel_post" => UpdateType::ChannelPost,
                "callback_query" => UpdateType::CallbackQuery,
                "inline_query" => UpdateType::InlineQuery,
                "pre_checkout_query" => UpdateType::PreCheckoutQuery,
                "message_reaction" => UpdateType::MessageReaction,
                "chat_member" => UpdateType::ChatMember,
                other => UpdateType::Other(other.to_owned()),
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_base_ms == 0 || self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid(
                "ingestion backoff requires 0 < backoff_base_ms <= backoff_max_ms".into(),
            ));
        }
        Ok(())
    }
}

/// A rate-limit rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuleConfig {
    pub capacity: u32,
    pub window_ms: u64,
    #[serde(default)]
    pub scope: LimitScope,
}

impl RuleConfig {
    pub fn to_rule(&self) -> RateLimitRule {
        RateLimitRule::new(
            self.capacity,
            Duration::from_millis(self.window_ms),
            self.scope,
        )
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// How often idle buckets are swept.
    pub sweep_interval_secs: u64,
    /// Rules keyed by command name or callback route template.
    pub rules: BTreeMap<String, RuleConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            rules: BTreeMap::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, rule) in &self.rules {
            if rule.capacity == 0 || rule.window_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "rate limit rule `{name}` needs a non-zero capacity and window"
                )));
            }
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub ingestion: IngestionConfig,
    pub rate_limits: RateLimitConfig,
    pub logging: LoggingConfig,
    /// Bot username, used to ignore commands addressed to other bots.
    pub bot_username: Option<String>,
}

impl EngineConfig {
    /// Loads configuration from an optional file and `FERROGRAM__*`
    /// environment variables, then validates it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: EngineConfig = builder
            .add_source(
                config::Environment::with_prefix("FERROGRAM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.executor.validate()?;
        self.ingestion.validate()?;
        self.rate_limits.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.executor.lanes >= 2);
        assert_eq!(config.ingestion.poll_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn zero_lanes_rejected() {
        let config = ExecutorConfig::default().with_lanes(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn loads_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
bot_username = "shop_bot"

[executor]
lanes = 3
strategy = "thread"

[ingestion]
allowed_updates = ["message", "callback_query"]

[rate_limits.rules.buy]
capacity = 5
window_ms = 10000
scope = "chat"
"#
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.executor.lanes, 3);
        assert_eq!(config.executor.strategy, LaneStrategy::Thread);
        assert_eq!(config.executor.queue_capacity, 1024);
        assert_eq!(config.bot_username.as_deref(), Some("shop_bot"));
        assert_eq!(
            config.ingestion.allowed_update_types(),
            vec![UpdateType::Message, UpdateType::CallbackQuery]
        );
        let rule = config.rate_limits.rules["buy"].to_rule();
        assert_eq!(rule.capacity(), 5);
        assert_eq!(rule.scope(), LimitScope::Chat);
    }

    #[test]
    fn zero_capacity_rule_rejected() {
        let mut config = EngineConfig::default();
        config.rate_limits.rules.insert(
            "spam".into(),
            RuleConfig {
                capacity: 0,
                window_ms: 1000,
                scope: LimitScope::User,
            },
        );
        assert!(config.validate().is_err());
    }
}
