//! Control messages posted to the worker by pages

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Activate a waiting worker now instead of after old clients close
    SkipWaiting,
    /// Ask for the current core cache generation name
    GetVersion,
}

impl WorkerMessage {
    /// Recognise a message payload. Anything unrecognised yields `None`.
    pub fn parse(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Reply to `GET_VERSION`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: String,
}
