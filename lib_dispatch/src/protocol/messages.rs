//! # Duplex Channel Messages
//!
//! The channel speaks JSON text frames tagged by a `type` field. Both
//! directions are closed enums, so an unexpected tag is a parse error that the
//! router logs and drops instead of a string comparison that silently falls
//! through.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DispatchError;

/// Messages sent from this client to the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Submit one job for processing.
    Job {
        /// Client-generated job id; echoed back on `result`/`error`.
        id: String,
        /// Arbitrary job payload, passed through untouched.
        payload: Value,
    },
}

impl OutboundMessage {
    /// Serializes the message into a text frame.
    pub fn to_frame(&self) -> Result<String, DispatchError> {
        serde_json::to_string(self).map_err(|e| DispatchError::Protocol(e.to_string()))
    }
}

/// Messages pushed by the service over the channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    /// Receipt acknowledgement. The service also sends a bare ack on accept.
    Ack {
        #[serde(default)]
        id: Option<String>,
    },
    /// Job finished successfully.
    Result {
        #[serde(default)]
        id: String,
        #[serde(default)]
        result: Value,
    },
    /// Job failed on the service side.
    Error {
        #[serde(default)]
        id: String,
        #[serde(default)]
        error: Option<String>,
    },
}

impl InboundMessage {
    /// Parses one inbound text frame.
    pub fn parse(frame: &str) -> Result<Self, DispatchError> {
        serde_json::from_str(frame).map_err(|e| DispatchError::Protocol(e.to_string()))
    }
}

/// Reads the application-level content id a result carries in `metadata.image_id`.
pub fn result_content_id(result: &Value) -> Option<&str> {
    result
        .get("metadata")
        .and_then(|m| m.get("image_id"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
