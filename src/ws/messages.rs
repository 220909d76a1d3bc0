//! Wire frame types: outbound room control and inbound data frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// Frame type of an inbound data frame.
pub const MESSAGE_TYPE: &str = "message";

/// Room control verb.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// Start receiving a room.
    Join,
    /// Stop receiving a room.
    Leave,
}

/// Outbound control frame: `{"type": "join" | "leave", "room": <topic>}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlFrame {
    /// Join or leave.
    #[serde(rename = "type")]
    pub kind: ControlKind,
    /// Target room.
    pub room: String,
}

impl ControlFrame {
    /// Builds a join frame for `room`.
    #[must_use]
    pub fn join(room: impl Into<String>) -> Self {
        Self {
            kind: ControlKind::Join,
            room: room.into(),
        }
    }

    /// Builds a leave frame for `room`.
    #[must_use]
    pub fn leave(room: impl Into<String>) -> Self {
        Self {
            kind: ControlKind::Leave,
            room: room.into(),
        }
    }

    /// Serializes the frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MalformedFrame`] if serialization fails.
    pub fn to_text(&self) -> Result<String, ClientError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound frame envelope.
///
/// Only frames whose `type` is [`MESSAGE_TYPE`] are routed; `room` is
/// required for those and optional otherwise.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    /// Frame type discriminator.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Room the frame belongs to.
    #[serde(default)]
    pub room: Option<String>,
    /// Payload delivered to listeners.
    #[serde(default)]
    pub data: Value,
}

impl InboundFrame {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MalformedFrame`] if `text` is not a JSON
    /// object with a string `type`.
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Returns `true` for data frames.
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.msg_type == MESSAGE_TYPE
    }

    /// Returns the transaction identifier carried in `data.tx`, if any.
    ///
    /// Empty strings and non-scalar values count as absent.
    #[must_use]
    pub fn tx(&self) -> Option<String> {
        scalar_field(&self.data, "tx")
    }

    /// Returns the token identifier carried in `data.token`, if any.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        scalar_field(&self.data, "token")
    }
}

fn scalar_field(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
