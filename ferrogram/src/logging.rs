//! # Logging
//!
//! Console logging through the `tracing` ecosystem.
//!
//! - `RUST_LOG` wins over [`LoggingConfig::level`] when set
//! - human-readable output (ANSI colours only on a TTY) or JSON lines
//! - safe to call more than once; only the first call installs a subscriber
//!
//! Every update handled by the engine runs inside an `update` span carrying
//! `correlation_id`, `update_id`, `kind`, `key` and `lane`, so log lines
//! emitted by handlers are attributable to the update that caused them.

use ferrogram_std::LoggingConfig;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs the global tracing subscriber described by `config`.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.level));

        let layer = if config.json {
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_ansi(std::io::stdout().is_terminal())
                .with_filter(filter)
                .boxed()
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(level = %config.level, json = config.json, "tracing initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_harmless() {
        let config = LoggingConfig::default();
        init_tracing(&config);
        init_tracing(&LoggingConfig {
            level: "debug".into(),
            json: true,
        });
    }
}
