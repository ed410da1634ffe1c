//! Messages exchanged between page and worker.

use serde::{Deserialize, Serialize};

/// Page → worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    /// Release a waiting generation.
    SkipWaiting,
    /// Ask the generation for its version string.
    GetVersion,
}

/// Worker → page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerReply {
    Version { version: String },
}

/// What the worker decided to do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The worker asked to skip the waiting phase.
    SkipWaiting,
    /// The worker answered.
    Reply(WorkerReply),
}

impl PageMessage {
    /// Decode a message posted as JSON. Unknown message types are `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}
