//! Chat socket wire protocol.
//!
//! Every frame is a JSON text frame. Inbound frames are objects carrying a
//! string `type` discriminator; the remaining fields are kind-specific and
//! are handed to listeners untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::EnvelopeError;
use crate::models::ChannelIdentity;

/// Field carrying the event discriminator in both directions.
pub const TYPE_FIELD: &str = "type";

/// Error payload text dispatched for transport-level failures.
pub const CONNECTION_ERROR: &str = "Connection error";

/// Path of the chat socket for a channel, relative to the socket base URL.
///
/// Format: `ws/chat/{channel_type}/{channel_id}/`
pub fn chat_path(channel: &ChannelIdentity) -> String {
    format!(
        "ws/chat/{}/{}/",
        channel.channel_type,
        urlencoding::encode(&channel.channel_id)
    )
}

/// Path of a user's notification socket, relative to the socket base URL.
///
/// Format: `ws/notifications/{user_id}/`
pub fn notifications_path(user_id: &str) -> String {
    format!("ws/notifications/{}/", urlencoding::encode(user_id))
}

/// Kinds of events the chat socket delivers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Message,
    Image,
    /// Read receipt.
    Read,
    Typing,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Message,
        EventKind::Image,
        EventKind::Read,
        EventKind::Typing,
        EventKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Image => "image",
            EventKind::Read => "read",
            EventKind::Typing => "typing",
            EventKind::Error => "error",
        }
    }

    /// Map a wire discriminator to a kind. Unknown discriminators yield `None`.
    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound event: its kind plus the full JSON object it arrived as.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EventKind,
    pub payload: Value,
}

impl Envelope {
    /// Parse one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let payload: Value = serde_json::from_str(text)?;
        let object = payload.as_object().ok_or(EnvelopeError::NotAnObject)?;
        let tag = object
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or(EnvelopeError::MissingType)?;
        let kind =
            EventKind::from_wire(tag).ok_or_else(|| EnvelopeError::UnknownKind(tag.to_string()))?;
        Ok(Self { kind, payload })
    }

    /// Envelope dispatched to error listeners when the transport fails.
    pub fn connection_error(detail: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            payload: json!({
                "type": EventKind::Error.as_str(),
                "error": CONNECTION_ERROR,
                "detail": detail.into(),
            }),
        }
    }

    /// Look up a payload field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.payload.as_object()
    }
}

/// Outbound frames understood by the chat server.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundEvent {
    Message { message: Value },
    Typing,
    Image { image: Value },
    Read { message_id: String },
}

impl OutboundEvent {
    pub fn message(message: impl Into<Value>) -> Self {
        OutboundEvent::Message {
            message: message.into(),
        }
    }

    pub fn image(image: impl Into<Value>) -> Self {
        OutboundEvent::Image {
            image: image.into(),
        }
    }

    pub fn read(message_id: impl Into<String>) -> Self {
        OutboundEvent::Read {
            message_id: message_id.into(),
        }
    }
}
