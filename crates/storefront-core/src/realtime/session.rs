//! WebSocket chat session.
//!
//! One session holds at most one connection. The connection is a reader
//! task that applies inbound frames to the shared [`ChatState`] and a
//! writer task fed through an unbounded channel. Connection state moves
//! `Disconnected -> Connecting -> Open -> Closing -> Disconnected`;
//! transport errors are reported as events and only the stream ending
//! moves the state back to `Disconnected`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::conversation::{ChatState, FrameOutcome};
use super::frames::{ClientAction, ServerFrame};
use crate::auth::CredentialStore;
use crate::models::{Contact, Message, ParticipantRole};

/// Capacity of the session event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long `close()` waits for the close frame to be flushed
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("An access token is required to open the chat connection")]
    MissingToken,

    #[error("Chat connection is not open")]
    ConnectionNotOpen,

    #[error("Invalid chat endpoint: {0}")]
    InvalidUrl(String),

    #[error("Failed to connect to chat server: {0}")]
    Connect(String),

    #[error("Failed to encode chat action: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Observable session events.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    ContactsReplaced(Vec<Contact>),
    ConversationReplaced(Vec<Message>),
    MessageAppended(Message),
    /// The server answered with a non-success status
    ServerError(String),
    /// The WebSocket itself reported an error
    TransportError(String),
}

/// Shared between the session handle and its reader task
struct Shared {
    chat: Mutex<ChatState>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
    /// Bumped on every connect so a stale reader cannot touch the state
    generation: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        if *self.state.borrow() != state {
            debug!(?state, "Chat connection state changed");
            self.state.send_replace(state);
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn handle_text(&self, text: &str) {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping unparsable chat frame");
                return;
            }
        };

        let event = {
            let mut chat = self.chat.lock();
            match chat.apply(frame) {
                FrameOutcome::ContactsReplaced(count) => {
                    debug!(count, "Contact list replaced");
                    Some(SessionEvent::ContactsReplaced(chat.contacts().to_vec()))
                }
                FrameOutcome::ConversationReplaced(count) => {
                    debug!(count, "Conversation history replaced");
                    Some(SessionEvent::ConversationReplaced(chat.messages().to_vec()))
                }
                FrameOutcome::MessageAppended(message) => Some(SessionEvent::MessageAppended(message)),
                FrameOutcome::Rejected(error) => Some(SessionEvent::ServerError(error)),
                FrameOutcome::MessageIgnored | FrameOutcome::Unrecognized => None,
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
    }
}

/// A live connection: outbound queue plus the two socket tasks
struct Link {
    outbound: mpsc::UnboundedSender<WsMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Chat session over a single WebSocket connection.
///
/// Dropping the session tears the connection down.
pub struct RealtimeSession {
    endpoint: String,
    shared: Arc<Shared>,
    link: Option<Link>,
}

impl RealtimeSession {
    pub fn new(endpoint: impl Into<String>, role: ParticipantRole) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            endpoint: endpoint.into(),
            shared: Arc::new(Shared {
                chat: Mutex::new(ChatState::new(role)),
                state,
                events,
                generation: AtomicU64::new(0),
            }),
            link: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.shared.chat.lock().contacts().to_vec()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.chat.lock().messages().to_vec()
    }

    pub fn selected_contact(&self) -> Option<Contact> {
        self.shared.chat.lock().selected().cloned()
    }

    /// Own participant id, stamped on locally recorded outgoing messages
    pub fn set_own_id(&self, id: Option<String>) {
        self.shared.chat.lock().set_own_id(id);
    }

    fn endpoint_url(&self, token: &str, role: ParticipantRole) -> Result<Url, RealtimeError> {
        Url::parse_with_params(&self.endpoint, &[("token", token), ("senderType", role.as_str())])
            .map_err(|e| RealtimeError::InvalidUrl(format!("{}: {}", self.endpoint, e)))
    }

    /// Open the connection with the current access token from the store
    pub async fn connect_with(
        &mut self,
        store: &CredentialStore,
        role: ParticipantRole,
    ) -> Result<(), RealtimeError> {
        let token = store.access_token().unwrap_or_default();
        self.connect(&token, role).await
    }

    /// Open the chat connection.
    ///
    /// An existing connection is closed first. On open the contact list
    /// is requested.
    pub async fn connect(&mut self, token: &str, role: ParticipantRole) -> Result<(), RealtimeError> {
        if token.trim().is_empty() {
            error!("Token is required to establish the chat connection");
            return Err(RealtimeError::MissingToken);
        }
        if self.link.is_some() {
            info!("Replacing existing chat connection");
            self.close().await;
        }

        let url = self.endpoint_url(token, role)?;
        self.shared.chat.lock().set_role(role);
        self.shared.set_state(ConnectionState::Connecting);

        let stream = match connect_async(url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Chat connection failed");
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(RealtimeError::Connect(e.to_string()));
            }
        };
        info!(endpoint = %self.endpoint, "Chat connection open");
        self.shared.set_state(ConnectionState::Open);

        let (mut sink, mut source) = stream.split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<WsMessage>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = queue.recv().await {
                let closing = matches!(frame, WsMessage::Close(_));
                if let Err(e) = sink.send(frame).await {
                    warn!(error = %e, "Chat send failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            debug!("Chat writer task ended");
        });

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = self.shared.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => shared.handle_text(text.as_str()),
                    Ok(WsMessage::Close(reason)) => {
                        info!(?reason, "Chat connection closed by server");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Chat connection error");
                        shared.emit(SessionEvent::TransportError(e.to_string()));
                    }
                }
            }
            if shared.generation.load(Ordering::SeqCst) == generation {
                shared.set_state(ConnectionState::Disconnected);
            }
            debug!("Chat reader task ended");
        });

        self.link = Some(Link {
            outbound,
            reader,
            writer,
        });

        self.send_action(&ClientAction::GetContacts)
    }

    fn send_action(&self, action: &ClientAction) -> Result<(), RealtimeError> {
        let link = match self.link.as_ref() {
            Some(link) if self.state() == ConnectionState::Open => link,
            _ => {
                warn!("Chat connection is not open");
                return Err(RealtimeError::ConnectionNotOpen);
            }
        };
        let payload = encode_action(action)?;
        link.outbound
            .send(WsMessage::text(payload))
            .map_err(|_| RealtimeError::ConnectionNotOpen)
    }

    /// Send a chat message. Nothing is queued when the connection is down.
    pub fn send_message(
        &self,
        recipient_id: &str,
        recipient_type: &str,
        text: &str,
    ) -> Result<(), RealtimeError> {
        self.send_action(&ClientAction::SendMessage {
            recipient_id: recipient_id.to_string(),
            recipient_type: recipient_type.to_string(),
            message: text.to_string(),
        })?;

        let recorded = self
            .shared
            .chat
            .lock()
            .record_outgoing(recipient_id, recipient_type, text, Utc::now());
        if let Some(message) = recorded {
            self.shared.emit(SessionEvent::MessageAppended(message));
        }
        Ok(())
    }

    /// Request the history with one contact. The local conversation is
    /// left as it is until the history arrives.
    pub fn get_messages(&self, recipient_id: &str) -> Result<(), RealtimeError> {
        let sender_type = self.shared.chat.lock().role().as_str().to_string();
        self.send_action(&ClientAction::GetMessages {
            sender_type,
            recipient_id: recipient_id.to_string(),
        })
    }

    /// Ask the server for the contact list again
    pub fn get_contacts(&self) -> Result<(), RealtimeError> {
        self.send_action(&ClientAction::GetContacts)
    }

    /// Switch the conversation: clear it and request the new history
    pub fn select_contact(&self, contact: Contact) -> Result<(), RealtimeError> {
        let id = contact.id.clone();
        self.shared.chat.lock().select(contact);
        self.get_messages(&id)
    }

    /// Close the connection. Safe to call when already closed.
    pub async fn close(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        self.shared.set_state(ConnectionState::Closing);

        let _ = link.outbound.send(WsMessage::Close(None));
        drop(link.outbound);

        let mut writer = link.writer;
        if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
            debug!("Close frame not flushed in time");
            writer.abort();
        }
        link.reader.abort();

        self.shared.set_state(ConnectionState::Disconnected);
        info!("Chat connection closed");
    }
}

fn encode_action(action: &ClientAction) -> Result<String, RealtimeError> {
    serde_json::to_string(action).map_err(|e| RealtimeError::Encode(e.to_string()))
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            // Writer flushes the close frame and exits on its own
            let _ = link.outbound.send(WsMessage::Close(None));
            link.reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_without_token_fails_fast() {
        let mut session = RealtimeSession::new("ws://127.0.0.1:9/ws/chat", ParticipantRole::Vendor);
        assert_eq!(session.connect("", ParticipantRole::Vendor).await, Err(RealtimeError::MissingToken));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_with_empty_store_fails_fast() {
        let mut session = RealtimeSession::new("ws://127.0.0.1:9/ws/chat", ParticipantRole::Vendor);
        let store = CredentialStore::in_memory();
        assert_eq!(
            session.connect_with(&store, ParticipantRole::Vendor).await,
            Err(RealtimeError::MissingToken)
        );
    }

    #[test]
    fn test_send_while_disconnected_is_reported() {
        let session = RealtimeSession::new("ws://127.0.0.1:9/ws/chat", ParticipantRole::Vendor);
        assert_eq!(session.send_message("u1", "user", "hi"), Err(RealtimeError::ConnectionNotOpen));
        assert_eq!(session.get_messages("u1"), Err(RealtimeError::ConnectionNotOpen));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_endpoint_url_carries_token_and_role() {
        let session = RealtimeSession::new("ws://localhost:3000/ws/chat", ParticipantRole::Vendor);
        let url = session.endpoint_url("a.b c", ParticipantRole::Vendor).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:3000/ws/chat?token=a.b+c&senderType=vendor");

        let bad = RealtimeSession::new("not a url", ParticipantRole::Vendor);
        assert!(matches!(bad.endpoint_url("t", ParticipantRole::User), Err(RealtimeError::InvalidUrl(_))));
    }

    #[test]
    fn test_encode_action_and_encode_error_display() {
        let payload = encode_action(&ClientAction::GetContacts).unwrap();
        assert_eq!(payload, r#"{"action":"getContacts"}"#);

        let err = RealtimeError::Encode("key must be a string".into());
        assert_eq!(err.to_string(), "Failed to encode chat action: key must be a string");
        assert_ne!(err, RealtimeError::Connect("key must be a string".into()));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut session = RealtimeSession::new("ws://127.0.0.1:9/ws/chat", ParticipantRole::Vendor);
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connection_refused_returns_to_disconnected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut session = RealtimeSession::new(format!("ws://{}/ws/chat", addr), ParticipantRole::Vendor);
        let result = session.connect("token", ParticipantRole::Vendor).await;
        assert!(matches!(result, Err(RealtimeError::Connect(_))));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
