//! Messages exchanged between pages and the worker.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Command posted by a page to the worker.
///
/// Payloads are objects tagged by `type`. Anything unrecognised, including
/// payloads that are not objects at all, decodes to [`ControlMessage::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate a waiting worker without waiting for pages to close.
    SkipWaiting,
    /// Check the worker script for updates.
    CheckUpdate,
    /// Any other message; ignored.
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Decode a page message.
    pub fn from_value(data: &JsonValue) -> Self {
        Self::deserialize(data).unwrap_or(Self::Unknown)
    }
}

/// Notification posted by the worker to controlled pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// A new worker version took control.
    SwUpdated { version: String },
}
