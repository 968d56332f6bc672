//! Data models for the vendor client.
//!
//! - `Contact`, `Message`, `ParticipantRole`: chat domain types
//! - `ApiEnvelope`, `Vendor`, and the request bodies the client builds
//!   for the REST API. Everything else stays opaque JSON.

pub mod chat;
pub mod vendor;

pub use chat::{Contact, Message, ParticipantRole};
pub use vendor::{
    ApiEnvelope, IssueUpdate, LoginRequest, LoginResponse, OrderUpdate, ProductDraft,
    ProductVariation, Vendor, VendorRegistration,
};
