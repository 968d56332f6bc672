//! Wire frames for the chat WebSocket.
//!
//! Outbound frames are JSON objects discriminated by `action`. Inbound
//! frames carry a `status` plus exactly one of `contacts`, `messages` or
//! `message`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::vendor::id_from_value;
use crate::models::{Contact, Message};
use crate::utils::format_timestamp;

/// Client-to-server action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientAction {
    #[serde(rename_all = "camelCase")]
    SendMessage {
        recipient_id: String,
        recipient_type: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    GetMessages {
        sender_type: String,
        recipient_id: String,
    },
    GetContacts,
}

/// A classified server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Contacts(Vec<Contact>),
    History(Vec<Message>),
    Message(Message),
    /// Non-success status; carries the server's error text
    Rejected(String),
    /// Success frame with nothing this client understands
    Unrecognized,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    status: Option<String>,
    contacts: Option<Vec<Value>>,
    messages: Option<Vec<Value>>,
    message: Option<Value>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawParty {
    id: Value,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    sender: RawParty,
    recipient: RawParty,
    message: String,
    #[serde(default)]
    created_at: Option<String>,
}

impl RawMessage {
    fn into_message(self) -> Option<Message> {
        Some(Message {
            sender_id: id_from_value(&self.sender.id)?,
            sender_type: self.sender.kind.unwrap_or_default(),
            recipient_id: id_from_value(&self.recipient.id)?,
            recipient_type: self.recipient.kind.unwrap_or_default(),
            content: self.message,
            timestamp: self
                .created_at
                .as_deref()
                .map(format_timestamp)
                .unwrap_or_default(),
        })
    }
}

/// Normalize a server contact, preferring `user_id` and falling back to `_id`
fn contact_from_value(value: &Value) -> Option<Contact> {
    let id = value
        .get("user_id")
        .and_then(id_from_value)
        .or_else(|| value.get("_id").and_then(id_from_value))?;
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(Contact { id, name })
}

fn message_from_value(value: Value) -> Option<Message> {
    serde_json::from_value::<RawMessage>(value)
        .ok()
        .and_then(RawMessage::into_message)
}

impl ServerFrame {
    /// Parse and classify one text frame.
    ///
    /// Malformed entries inside a list are skipped rather than failing the
    /// whole frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawFrame = serde_json::from_str(text)?;

        if raw.status.as_deref() != Some("success") {
            let error = match raw.error {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => format!("status {}", raw.status.as_deref().unwrap_or("missing")),
            };
            return Ok(ServerFrame::Rejected(error));
        }

        if let Some(contacts) = raw.contacts {
            return Ok(ServerFrame::Contacts(
                contacts.iter().filter_map(contact_from_value).collect(),
            ));
        }
        if let Some(messages) = raw.messages {
            return Ok(ServerFrame::History(
                messages.into_iter().filter_map(message_from_value).collect(),
            ));
        }
        if let Some(message) = raw.message.and_then(message_from_value) {
            return Ok(ServerFrame::Message(message));
        }
        Ok(ServerFrame::Unrecognized)
    }
}
