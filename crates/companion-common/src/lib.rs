//! # Companion Common
//!
//! Shared error type, logging setup and configuration for the Course Companion
//! workspace.
//!
//! ## Features
//!
//! - Error type for configuration loading
//! - Subscriber setup driven by the `log` config section
//! - JSON configuration file with defaults and validation

use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::{CompanionConfig, LogSettings};
pub use logging::{init_logging, level_filter, LogFormat};

/// Unified error type for configuration and glue code.
#[derive(Error, Debug)]
pub enum CompanionError {
    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse errors.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl CompanionError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias for Course Companion glue operations.
pub type Result<T> = std::result::Result<T, CompanionError>;
