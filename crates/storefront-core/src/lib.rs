//! Core library for the storefront vendor client.
//!
//! A client-side session layer: credential storage, JWT expiry and
//! refresh, an authenticating request pipeline that decrypts response
//! payloads, and a realtime chat session over WebSocket. Everything hangs
//! off a [`SessionContext`].

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod models;
pub mod realtime;
pub mod session;
pub mod utils;

pub use api::{ApiError, ApiRequest, ApiResponse, RequestPipeline, VendorApi};
pub use auth::{Credential, CredentialStore, TokenManager};
pub use config::Config;
pub use crypto::PayloadCipher;
pub use models::{Contact, Message, ParticipantRole};
pub use realtime::{ConnectionState, RealtimeSession, SessionEvent};
pub use session::SessionContext;
