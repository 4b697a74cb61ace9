//! Feedback messages, the ingress channels they arrive on, and inbound decoding.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the store on insert.
pub type MessageId = i64;

/// Label stored for messages submitted over HTTP.
pub const REQUEST_CHANNEL_LABEL: &str = "test@friendy.me";

/// Label stored for messages received over the WebSocket channel.
pub const STREAM_CHANNEL_LABEL: &str = "ws@friendy.me";

/// Ingress path a message arrived through. Each channel has its own daily quota bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// One-shot HTTP submission (`POST /test`).
    Request,
    /// Long-lived WebSocket echo channel (`GET /ws`).
    Stream,
}

impl Channel {
    /// Label persisted with each message and used as the quota bucket key.
    pub fn label(self) -> &'static str {
        match self {
            Channel::Request => REQUEST_CHANNEL_LABEL,
            Channel::Stream => STREAM_CHANNEL_LABEL,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            REQUEST_CHANNEL_LABEL => Some(Channel::Request),
            STREAM_CHANNEL_LABEL => Some(Channel::Stream),
            _ => None,
        }
    }
}

/// A decoded submission waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub content: String,
    pub channel: Channel,
    pub submitted_at: DateTime<Utc>,
}

impl Message {
    pub fn new(content: impl Into<String>, channel: Channel, submitted_at: DateTime<Utc>) -> Self {
        Self {
            content: content.into(),
            channel,
            submitted_at,
        }
    }

    /// UTC calendar day this message counts against.
    pub fn day(&self) -> NaiveDate {
        self.submitted_at.date_naive()
    }
}

/// A persisted message as kept by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: MessageId,
    pub content: String,
    pub label: String,
    pub submitted_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn from_message(id: MessageId, message: &Message) -> Self {
        Self {
            id,
            content: message.content.clone(),
            label: message.channel.label().to_string(),
            submitted_at: message.submitted_at,
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.submitted_at.date_naive()
    }
}

/// Request body for the HTTP submission endpoint: `{ "msg": string }`.
///
/// A missing or null `msg` decodes to empty content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Incoming {
    #[serde(default)]
    pub msg: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed request body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Decode raw inbound bytes into message content for `channel`.
/// Request bodies are JSON `{ "msg": ... }`; stream frames are the content itself.
pub fn decode(channel: Channel, raw: &[u8]) -> Result<String, DecodeError> {
    match channel {
        Channel::Request => {
            let incoming: Incoming = serde_json::from_slice(raw)?;
            Ok(incoming.msg.unwrap_or_default())
        }
        Channel::Stream => Ok(std::str::from_utf8(raw)?.to_string()),
    }
}
