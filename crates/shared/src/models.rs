//! Shared data models for the eventhub chat client.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChannelTypeError;

// --- Channels ---

/// Kind of conversation a chat channel carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// One-to-one conversation between two users.
    #[default]
    Personal,
    /// Group (event-based) conversation.
    Group,
}

impl ChannelType {
    /// Path segment used by the chat routing on the server.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Personal => "personal",
            ChannelType::Group => "group",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = ChannelTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "personal" => Ok(ChannelType::Personal),
            "group" => Ok(ChannelType::Group),
            other => Err(ChannelTypeError(other.to_string())),
        }
    }
}

/// Identity of a logical conversation: `(channel_id, channel_type)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ChannelIdentity {
    pub channel_id: String,
    pub channel_type: ChannelType,
}

impl ChannelIdentity {
    pub fn new(channel_id: impl Into<String>, channel_type: ChannelType) -> Self {
        Self {
            channel_id: channel_id.into(),
            channel_type,
        }
    }

    pub fn personal(channel_id: impl Into<String>) -> Self {
        Self::new(channel_id, ChannelType::Personal)
    }

    pub fn group(channel_id: impl Into<String>) -> Self {
        Self::new(channel_id, ChannelType::Group)
    }
}

impl fmt::Display for ChannelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_type, self.channel_id)
    }
}
