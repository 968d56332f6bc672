//! Local contact list and conversation view.
//!
//! Invariants:
//! - `contacts` is always exactly the last list the server pushed
//! - real-time messages are appended only when they involve the selected
//!   contact and their (content, timestamp) pair is not already shown

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::frames::ServerFrame;
use crate::models::{Contact, Message, ParticipantRole};
use crate::utils::format_instant;

/// What applying a frame did to the local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    ContactsReplaced(usize),
    ConversationReplaced(usize),
    MessageAppended(Message),
    MessageIgnored,
    Rejected(String),
    Unrecognized,
}

#[derive(Debug, Clone)]
pub struct ChatState {
    role: ParticipantRole,
    own_id: Option<String>,
    contacts: Vec<Contact>,
    selected: Option<Contact>,
    messages: Vec<Message>,
}

impl ChatState {
    pub fn new(role: ParticipantRole) -> Self {
        Self {
            role,
            own_id: None,
            contacts: Vec::new(),
            selected: None,
            messages: Vec::new(),
        }
    }

    pub fn role(&self) -> ParticipantRole {
        self.role
    }

    pub fn set_role(&mut self, role: ParticipantRole) {
        self.role = role;
    }

    /// Own participant id, used as the sender id of locally recorded messages
    pub fn set_own_id(&mut self, id: Option<String>) {
        self.own_id = id;
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn selected(&self) -> Option<&Contact> {
        self.selected.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn apply(&mut self, frame: ServerFrame) -> FrameOutcome {
        match frame {
            ServerFrame::Contacts(contacts) => {
                self.replace_contacts(contacts);
                FrameOutcome::ContactsReplaced(self.contacts.len())
            }
            ServerFrame::History(history) => {
                let Some(ref selected) = self.selected else {
                    debug!("History received with no contact selected, ignoring");
                    return FrameOutcome::MessageIgnored;
                };
                // A reply to an earlier selection can land after a fast switch
                if !history.iter().all(|m| m.involves(&selected.id)) {
                    debug!(selected = %selected.id, "History for another contact, ignoring");
                    return FrameOutcome::MessageIgnored;
                }
                self.replace_history(history);
                FrameOutcome::ConversationReplaced(self.messages.len())
            }
            ServerFrame::Message(message) => {
                if self.push_message(message.clone()) {
                    FrameOutcome::MessageAppended(message)
                } else {
                    FrameOutcome::MessageIgnored
                }
            }
            ServerFrame::Rejected(error) => {
                warn!(error = %error, "Chat server reported an error");
                FrameOutcome::Rejected(error)
            }
            ServerFrame::Unrecognized => FrameOutcome::Unrecognized,
        }
    }

    /// Replace the contact set wholesale
    pub fn replace_contacts(&mut self, contacts: Vec<Contact>) {
        self.contacts = contacts;
    }

    /// Select a contact, discarding the current conversation
    pub fn select(&mut self, contact: Contact) {
        self.selected = Some(contact);
        self.messages.clear();
    }

    /// Replace the visible conversation with a fetched history
    pub fn replace_history(&mut self, history: Vec<Message>) {
        self.messages = history;
    }

    pub fn is_duplicate(&self, message: &Message) -> bool {
        self.messages.iter().any(|m| m.same_identity(message))
    }

    /// Append a real-time message if it is new and belongs to the selected
    /// conversation. Returns whether it was appended.
    pub fn push_message(&mut self, message: Message) -> bool {
        let Some(ref selected) = self.selected else {
            return false;
        };
        if !message.involves(&selected.id) || self.is_duplicate(&message) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Record a message this client just sent, so the view updates before
    /// the server echoes it back
    pub fn record_outgoing(
        &mut self,
        recipient_id: &str,
        recipient_type: &str,
        text: &str,
        sent_at: DateTime<Utc>,
    ) -> Option<Message> {
        let message = Message {
            sender_id: self.own_id.clone().unwrap_or_default(),
            sender_type: self.role.as_str().to_string(),
            recipient_id: recipient_id.to_string(),
            recipient_type: recipient_type.to_string(),
            content: text.to_string(),
            timestamp: format_instant(&sent_at),
        };
        self.push_message(message.clone()).then_some(message)
    }
}
