//! Chat domain types shared by the realtime session and its consumers.

use serde::{Deserialize, Serialize};

/// Which side of the marketplace a chat participant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Vendor,
    User,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Vendor => "vendor",
            ParticipantRole::User => "user",
        }
    }
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ParticipantRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vendor" => Ok(ParticipantRole::Vendor),
            "user" => Ok(ParticipantRole::User),
            other => Err(format!("unknown participant role: {}", other)),
        }
    }
}

/// A chat contact as pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct Contact {
    pub id: String,
    pub name: String,
}

impl Contact {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Single-letter avatar initial
    pub fn initial(&self) -> String {
        self.name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .take(1)
            .flat_map(char::to_uppercase)
            .collect()
    }
}

/// A chat message with display-ready fields.
///
/// `timestamp` is the formatted local time (second granularity); together
/// with `content` it identifies a message within one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: String,
    pub sender_type: String,
    pub recipient_id: String,
    pub recipient_type: String,
    pub content: String,
    pub timestamp: String,
}

impl Message {
    /// Whether this message was sent or received by the given participant
    pub fn involves(&self, participant_id: &str) -> bool {
        self.sender_id == participant_id || self.recipient_id == participant_id
    }

    /// Dedup identity within a conversation
    pub fn same_identity(&self, other: &Message) -> bool {
        self.content == other.content && self.timestamp == other.timestamp
    }
}
