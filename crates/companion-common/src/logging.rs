//! Subscriber setup for the `log` section of the configuration file.
//!
//! `RUST_LOG` directives, when present, are layered over the configured level.

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogSettings;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// One JSON object per event, fields flattened.
    Json,
}

/// Parse a configured level name. Unknown names fall back to INFO.
pub fn level_filter(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::INFO)
}

fn env_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level_filter(&settings.level).into())
        .from_env_lossy()
}

/// Install the global subscriber described by `settings`.
///
/// Returns false when a global subscriber was already installed.
pub fn init_logging(settings: &LogSettings) -> bool {
    let filter = env_filter(settings);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match settings.format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true))
            .try_init(),
    };

    result.is_ok()
}
