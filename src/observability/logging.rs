//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. Output is JSON by default (one object per
//! event, with the current span fields) or human-readable text.
//!
//! `RUST_LOG` takes precedence over the configured level when it is set, so a single
//! module can be turned up without touching the config file.

use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::LoggingConfig;

/// Initialize the tracing subscriber from the logging configuration
///
/// Calling this twice (as tests do) keeps the first subscriber.
pub fn init_logging(config: &LoggingConfig) {
    let env_filter = build_filter(config);

    let result = if config.format.eq_ignore_ascii_case("text") {
        Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
    };

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
