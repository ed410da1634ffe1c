//! Worker script: the deployable description of one worker generation.
//!
//! The file served at the registration path is JSON:
//!
//! ```json
//! { "version": "3", "cacheName": "course-companion-cache-v3", "shell": [".", "./index.html"] }
//! ```
//!
//! Update detection compares the SHA-256 of the raw bytes, so any byte change
//! (even whitespace) produces a new generation.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::ServiceWorkerError;

/// Cache name of the shipped worker script.
pub const CACHE_NAME: &str = "course-companion-cache-v3";

/// Document served for failed navigations.
pub const ROOT_DOCUMENT: &str = "./index.html";

/// App shell of the shipped worker script.
pub const APP_SHELL: &[&str] = &[
    ".",
    "./index.html",
    "./styles.css",
    "./app.js",
    "./translations.js",
    "./manifest.webmanifest",
];

/// Ordered list of relative asset paths cached at install time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShellManifest(Vec<String>);

impl ShellManifest {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(paths.into_iter().map(Into::into).collect())
    }

    pub fn paths(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve every path against the registration scope, keeping order.
    pub fn resolve(&self, scope: &Url) -> Result<Vec<Url>, ServiceWorkerError> {
        self.0
            .iter()
            .map(|path| {
                scope
                    .join(path)
                    .map_err(|e| ServiceWorkerError::InvalidUrl(format!("{}: {}", path, e)))
            })
            .collect()
    }
}

impl Default for ShellManifest {
    fn default() -> Self {
        Self::new(APP_SHELL.iter().copied())
    }
}

fn default_root_document() -> String {
    ROOT_DOCUMENT.to_string()
}

/// Parsed worker script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerScript {
    /// Version string reported to `GET_VERSION`.
    pub version: String,

    /// The one cache this generation owns.
    pub cache_name: String,

    /// Assets cached at install.
    pub shell: ShellManifest,

    /// Cached document used when a navigation fails.
    #[serde(default = "default_root_document")]
    pub root_document: String,
}

impl WorkerScript {
    /// The script shipped with the app.
    pub fn shipped() -> Self {
        Self {
            version: "3".to_string(),
            cache_name: CACHE_NAME.to_string(),
            shell: ShellManifest::default(),
            root_document: default_root_document(),
        }
    }

    /// Parse a script from the bytes served at the registration path.
    pub fn parse(bytes: &[u8]) -> Result<Self, ServiceWorkerError> {
        let script: Self = serde_json::from_slice(bytes)
            .map_err(|e| ServiceWorkerError::ScriptError(e.to_string()))?;

        if script.cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::ScriptError(
                "cacheName must not be empty".to_string(),
            ));
        }
        Ok(script)
    }

    /// Serialize for serving.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(self).unwrap_or_default()
    }
}

/// SHA-256 of a script's raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptFingerprint([u8; 32]);

impl ScriptFingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }
}

impl fmt::Display for ScriptFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
