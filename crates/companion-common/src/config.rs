//! Application configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use url::Url;

use crate::logging::LogFormat;
use crate::{CompanionError, Result};

/// Default path of the offline worker script, relative to the app scope.
pub const DEFAULT_SCRIPT_PATH: &str = "./service-worker.js";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompanionConfig {
    /// Origin and path the app is served from
    pub scope: Url,

    /// Worker script path, relative to `scope`
    pub script_path: String,

    /// User data directory
    pub data_dir: PathBuf,

    /// File name of the persisted local storage map inside `data_dir`
    pub storage_file: String,

    /// Language used when none has been stored yet
    pub default_language: String,

    /// Logging settings
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Level name (trace, debug, info, warn, error)
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            scope: Url::parse("http://localhost:8080/").expect("static URL"),
            script_path: DEFAULT_SCRIPT_PATH.to_string(),
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("course-companion"),
            storage_file: "local-storage.json".to_string(),
            default_language: "en".to_string(),
            log: LogSettings::default(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl CompanionConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults; a malformed or invalid file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => {
                let parsed: Self = serde_json::from_str(&contents).map_err(|e| {
                    CompanionError::config_with_source(
                        format!("failed to parse {}", path.display()),
                        e,
                    )
                })?;
                info!(path = %path.display(), "Loaded configuration");
                parsed
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.scope.cannot_be_a_base() {
            return Err(CompanionError::config(format!(
                "scope {} cannot be used as a base URL",
                self.scope
            )));
        }
        if self.script_path.is_empty() || Url::parse(&self.script_path).is_ok() {
            return Err(CompanionError::config(format!(
                "script path must be relative, got {:?}",
                self.script_path
            )));
        }
        if !matches!(self.default_language.as_str(), "en" | "es") {
            return Err(CompanionError::config(format!(
                "unsupported default language {:?}",
                self.default_language
            )));
        }
        if self.log.level.parse::<LevelFilter>().is_err() {
            return Err(CompanionError::config(format!(
                "unknown log level {:?}",
                self.log.level
            )));
        }
        Ok(())
    }

    /// Absolute URL of the worker script.
    pub fn script_url(&self) -> Result<Url> {
        Ok(self.scope.join(&self.script_path)?)
    }

    /// Path of the persisted local storage file.
    pub fn storage_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage_file)
    }
}
