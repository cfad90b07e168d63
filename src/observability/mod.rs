//! Logging setup

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::defaults::DEFAULT_LOG_TARGET;

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Lower this crate's level from `info` to `debug`
    pub debug: bool,
}

impl LoggingConfig {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    /// Filter used when `RUST_LOG` is not set
    pub fn default_filter(&self) -> String {
        let level = if self.debug { "debug" } else { "info" };
        format!("{DEFAULT_LOG_TARGET}={level}")
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured default filter.
pub fn init_tracing(config: &LoggingConfig) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.default_filter().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
